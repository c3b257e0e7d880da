//! 消费者游标
//!
//! 设备持有生产者游标 write_ptr，主机持有 read_ptr，两者都以字为单位单调递增，
//! 访问缓冲区时对容量取模。每次轮询把新的 write_ptr 和负载区交给 `consume`，
//! 按环形缓冲区顺序产出日志行和异常标记。
//!
//! 不变量:
//! - 正常返回后 `read_ptr <= write_ptr`
//! - 溢出修正后 `write_ptr - read_ptr <= capacity`
//! - 解码循环每轮至少前进 1 个字

use tracing::{debug, warn};

use crate::entry::{LogEntryHeader, RawLogLine};

/// 每个 (设备, 追踪核) 一份的游标状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorCursor {
    pub read_ptr: u32,
    pub last_write_ptr: u32,
    pub buffer_capacity_words: u32,
    pub buffer_base_address: u64,
}

impl CollectorCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新缓冲区位置，返回容量是否发生变化
    pub fn relocate(&mut self, base_address: u64, capacity_words: u32) -> bool {
        let changed = self.buffer_capacity_words != capacity_words;
        self.buffer_base_address = base_address;
        self.buffer_capacity_words = capacity_words;
        changed
    }

    /// 待读取的字数
    pub fn pending_words(&self, write_ptr: u32) -> u32 {
        write_ptr.saturating_sub(self.read_ptr)
    }

    /// 处理一次新读到的 write_ptr
    ///
    /// `entries` 为负载区的全部字；若比容量短，以其长度为准。
    pub fn consume(&mut self, write_ptr: u32, entries: &[u32]) -> Vec<RawLogLine> {
        let mut lines = Vec::new();

        if write_ptr == self.read_ptr {
            return lines;
        }

        if write_ptr < self.last_write_ptr {
            warn!(
                "cursor: device was restarted (wptr {} < last wptr {}, rptr {})",
                write_ptr, self.last_write_ptr, self.read_ptr
            );
            lines.push(RawLogLine::DeviceRestarted {
                new_write_ptr: write_ptr,
            });
            self.read_ptr = 0;
            self.last_write_ptr = 0;
            return lines;
        }

        if write_ptr < self.read_ptr {
            warn!(
                "cursor: read more lines than were created (wptr {}, rptr {})",
                write_ptr, self.read_ptr
            );
            lines.push(RawLogLine::ReadPointerAheadOfWrite);
            return lines;
        }

        let capacity = self.buffer_capacity_words.min(entries.len() as u32);
        if capacity == 0 {
            debug!("cursor: empty buffer, nothing to decode");
            return lines;
        }

        if write_ptr as u64 > self.read_ptr as u64 + capacity as u64 {
            let missed = write_ptr - self.read_ptr - capacity;
            warn!("cursor: buffer overrun, missed {} words", missed);
            lines.push(RawLogLine::BufferOverrun {
                missed_words: missed,
            });
            self.read_ptr = write_ptr - capacity;
        }

        debug!("cursor: wptr = {}, rptr = {}", write_ptr, self.read_ptr);

        let word_at = |ptr: u64| entries[(ptr % capacity as u64) as usize];

        while self.read_ptr < write_ptr && write_ptr != self.last_write_ptr {
            let hdr = LogEntryHeader::decode(word_at(self.read_ptr as u64));

            if !hdr.has_valid_signature() {
                lines.push(RawLogLine::InvalidSignature);
                self.read_ptr += 1;
                continue;
            }

            let count = hdr.param_count as u32;
            let remaining = write_ptr - self.read_ptr - 1;
            if !hdr.has_valid_param_count() || count > remaining {
                debug!(
                    "cursor: malformed entry at {} (param count {}, {} words left)",
                    self.read_ptr, count, remaining
                );
                lines.push(RawLogLine::InvalidSignature);
                self.read_ptr += 1;
                continue;
            }

            let params = (1..=count as u64)
                .map(|i| word_at(self.read_ptr as u64 + i))
                .collect();
            if let Some(line) = RawLogLine::normal(&hdr, params) {
                lines.push(line);
            }
            self.read_ptr += 1 + count;
        }

        self.last_write_ptr = write_ptr;
        lines
    }
}
