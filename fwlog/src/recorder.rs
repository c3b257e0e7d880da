//! 日志记录器
//!
//! 把解码后的日志行写入滚动文件:
//! - 文件名 `{device}_{tracer}_{本地时间}_{suffix}.log`，按文件名字典序即时间顺序
//! - 单文件超过配置大小时关闭并新建文件
//! - 目录内文件数达到上限时从最旧的开始删除
//!
//! 文件内容:
//! ```text
//! <LogFile><FW_Ver>..</FW_Ver><Compilation_Time>..</Compilation_Time>
//! <Third_Party_Flags>..</Third_Party_Flags><Log_Content><Logs>
//!   <Time>..</Time><Content>module,L,offset:p0,p1,p2 ...</Content>
//!   ...
//! </Logs></Log_Content></LogFile>
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use dev_access::{FwTimestamp, FwVersion};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CollectionConfig;
use crate::entry::RawLogLine;
use crate::header::{ModuleTable, TracerType};

pub const LOG_FILE_EXTENSION: &str = ".log";
pub const LOG_FILE_FOOTER: &str = "</Logs></Log_Content></LogFile>";
const CONTENT_OPEN: &str = "<Content>";
const CONTENT_CLOSE: &str = "</Content>";

/// 记录器错误
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("failed to create log folder {path}: {source}")]
    CreateFolder {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open output file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write output file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 记录器状态快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderState {
    pub current_file: Option<PathBuf>,
    pub current_file_bytes: u64,
    pub file_count_in_folder: u32,
}

struct OutputFile {
    path: PathBuf,
    writer: BufWriter<Box<dyn Write + Send>>,
}

/// 滚动文件记录器
pub struct LogCollectorRecorder {
    folder: PathBuf,
    file_prefix: String,
    debug_prefix: String,
    error_prefix: String,
    fw_version: FwVersion,
    fw_timestamp: FwTimestamp,
    current: Option<OutputFile>,
    current_file_bytes: u64,
    file_count_in_folder: u32,
}

impl LogCollectorRecorder {
    pub fn new<P: AsRef<Path>>(
        folder: P,
        device_name: &str,
        tracer: TracerType,
        fw_version: FwVersion,
        fw_timestamp: FwTimestamp,
    ) -> Self {
        Self {
            folder: folder.as_ref().to_path_buf(),
            file_prefix: format!("{}_{}_", device_name, tracer.as_str()),
            debug_prefix: format!("{} {} tracer: ", device_name, tracer.display_name()),
            error_prefix: format!(
                "\nhost_manager error: {} log tracer error in device {} - ",
                tracer.as_str(),
                device_name
            ),
            fw_version,
            fw_timestamp,
            current: None,
            current_file_bytes: 0,
            file_count_in_folder: 0,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn state(&self) -> RecorderState {
        RecorderState {
            current_file: self.current.as_ref().map(|f| f.path.clone()),
            current_file_bytes: self.current_file_bytes,
            file_count_in_folder: self.file_count_in_folder,
        }
    }

    /// 开始记录：建目录、统计已有文件、打开第一个文件并写文件头
    pub fn prepare_recording(
        &mut self,
        config: &CollectionConfig,
        modules: &ModuleTable,
    ) -> Result<(), RecorderError> {
        if self.current.is_some() {
            self.close_output_file();
        }
        self.current_file_bytes = 0;

        if !self.folder.is_dir() {
            fs::create_dir_all(&self.folder).map_err(|source| {
                error!(
                    "{}Failed to create logs folder {}",
                    self.debug_prefix,
                    self.folder.display()
                );
                RecorderError::CreateFolder {
                    path: self.folder.clone(),
                    source,
                }
            })?;
        }
        self.file_count_in_folder = self.count_log_files();

        self.create_new_output_file(config, modules).map_err(|e| {
            error!("{}failed to create the first output file: {}", self.debug_prefix, e);
            e
        })?;
        debug!("{}Log recorder preparation finished", self.debug_prefix);
        Ok(())
    }

    /// 每次轮询调用一次：超过单文件上限时滚动，返回是否发生了滚动
    pub fn handle_recording(
        &mut self,
        config: &CollectionConfig,
        modules: &ModuleTable,
    ) -> Result<bool, RecorderError> {
        let max_bytes = config.max_single_file_size_bytes();
        if self.current.is_none() || max_bytes == 0 || self.current_file_bytes <= max_bytes {
            return Ok(false);
        }

        self.close_output_file();
        self.remove_old_files_if_needed(config);
        self.create_new_output_file(config, modules).map_err(|e| {
            error!("{}failed to create a new output file: {}", self.debug_prefix, e);
            e
        })?;
        Ok(true)
    }

    /// 追加文本，返回写入字节数；没有打开的文件时返回 0
    ///
    /// 写失败时关闭当前文件，直到下一次 `prepare_recording` 成功前不再记录
    pub fn write(&mut self, line: &str, is_error_marker: bool) -> usize {
        let Some(file) = self.current.as_mut() else {
            return 0;
        };

        let text = if is_error_marker {
            format!("{}{}\n", self.error_prefix, line)
        } else {
            line.to_string()
        };

        match file.writer.write_all(text.as_bytes()) {
            Ok(()) => {
                self.current_file_bytes += text.len() as u64;
                text.len()
            }
            Err(e) => {
                error!(
                    "{}write to {} failed, recording disabled: {}",
                    self.debug_prefix,
                    file.path.display(),
                    e
                );
                self.current = None;
                self.current_file_bytes = 0;
                0
            }
        }
    }

    /// 写入一次轮询的全部日志行，外层包一个带时间的 Content 段
    pub fn record_lines(&mut self, lines: &[RawLogLine]) -> usize {
        if lines.is_empty() || self.current.is_none() {
            return 0;
        }
        let mut written = self.write(
            &format!(
                "<Time>{}</Time>{}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                CONTENT_OPEN
            ),
            false,
        );
        for line in lines {
            let (text, is_error) = line.record_text();
            written += self.write(&text, is_error);
        }
        written += self.write(CONTENT_CLOSE, false);
        written
    }

    pub fn flush(&mut self) {
        if let Some(file) = self.current.as_mut() {
            if let Err(e) = file.writer.flush() {
                warn!("{}flush failed: {}", self.debug_prefix, e);
            }
        }
    }

    /// 写结尾标记并关闭；没有打开的文件时什么也不做
    pub fn stop_recording(&mut self) {
        self.close_output_file();
    }

    fn close_output_file(&mut self) {
        if let Some(mut file) = self.current.take() {
            let closed = file
                .writer
                .write_all(LOG_FILE_FOOTER.as_bytes())
                .and_then(|_| file.writer.flush());
            match closed {
                Ok(()) => info!("{}Output file closed", self.debug_prefix),
                Err(e) => warn!(
                    "{}failed to close {}: {}",
                    self.debug_prefix,
                    file.path.display(),
                    e
                ),
            }
        }
        self.current_file_bytes = 0;
    }

    fn next_output_path(&self, config: &CollectionConfig) -> PathBuf {
        loop {
            let name = format!(
                "{}{}_{}{}",
                self.file_prefix,
                Local::now().format("%Y_%m_%d__%H_%M_%S_%6f"),
                config.output_suffix,
                LOG_FILE_EXTENSION
            );
            let path = self.folder.join(name);
            if !path.exists() {
                return path;
            }
        }
    }

    fn create_new_output_file(
        &mut self,
        config: &CollectionConfig,
        modules: &ModuleTable,
    ) -> Result<(), RecorderError> {
        let path = self.next_output_path(config);
        info!("{}Creating output file: {}", self.debug_prefix, path.display());

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| RecorderError::OpenFile {
                path: path.clone(),
                source,
            })?;
        self.file_count_in_folder += 1;

        let mut writer: BufWriter<Box<dyn Write + Send>> = BufWriter::new(Box::new(file));
        writer
            .write_all(self.file_header(modules).as_bytes())
            .map_err(|source| RecorderError::Write {
                path: path.clone(),
                source,
            })?;
        self.current = Some(OutputFile { path, writer });
        Ok(())
    }

    fn file_header(&self, modules: &ModuleTable) -> String {
        let v = &self.fw_version;
        let ts = &self.fw_timestamp;
        let flags: String = modules
            .iter()
            .map(|m| format!("<Flag><value>{}</value></Flag>", m.third_party as u8))
            .collect();
        format!(
            "<LogFile>\
             <FW_Ver><Major>{}</Major><Minor>{}</Minor><Sub>{}</Sub><Build>{}</Build></FW_Ver>\
             <Compilation_Time><Hour>{}</Hour><Minute>{}</Minute><Second>{}</Second>\
             <Day>{}</Day><Month>{}</Month><Year>{}</Year></Compilation_Time>\
             <Third_Party_Flags>{}</Third_Party_Flags><Log_Content><Logs>",
            v.major,
            v.minor,
            v.sub_minor,
            v.build,
            ts.hour,
            ts.min,
            ts.sec,
            ts.day,
            ts.month,
            ts.year,
            flags
        )
    }

    /// 直接挂上一个输出目标，跳过建目录和写文件头
    #[cfg(test)]
    pub(crate) fn attach_output(&mut self, path: PathBuf, writer: Box<dyn Write + Send>) {
        self.close_output_file();
        self.current = Some(OutputFile {
            path,
            writer: BufWriter::new(writer),
        });
    }

    fn is_log_file(&self, name: &str) -> bool {
        name.starts_with(&self.file_prefix) && name.ends_with(LOG_FILE_EXTENSION)
    }

    /// 本追踪核的日志文件名，字典序（即时间顺序）
    ///
    /// 只按名字匹配，同名的目录也会计入，删除时失败即停止淘汰。
    pub fn sorted_log_files(&self) -> io::Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.folder)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if self.is_log_file(name) {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn count_log_files(&self) -> u32 {
        match self.sorted_log_files() {
            Ok(files) => files.len() as u32,
            Err(e) => {
                warn!(
                    "{}cannot list {}: {}",
                    self.debug_prefix,
                    self.folder.display(),
                    e
                );
                0
            }
        }
    }

    /// 文件数达到上限时删除最旧的文件；删除失败则本次不再继续
    pub fn remove_old_files_if_needed(&mut self, config: &CollectionConfig) -> usize {
        if config.max_num_files == 0 {
            return 0;
        }

        let mut files = match self.sorted_log_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("{}Skipping old log files removal: {}", self.debug_prefix, e);
                return 0;
            }
        };

        let mut removed = 0;
        let mut oldest = files.drain(..);
        while self.file_count_in_folder >= config.max_num_files {
            let Some(name) = oldest.next() else {
                break;
            };
            let path = self.folder.join(&name);
            debug!("{}Remove old log file: {}", self.debug_prefix, path.display());
            if let Err(e) = fs::remove_file(&path) {
                warn!(
                    "{}Failed to remove old log file {}: {}",
                    self.debug_prefix,
                    path.display(),
                    e
                );
                break;
            }
            removed += 1;
            self.file_count_in_folder = self.count_log_files();
        }
        debug!(
            "{}Removed {} oldest log files, {} left in folder",
            self.debug_prefix, removed, self.file_count_in_folder
        );
        removed
    }
}

impl Drop for LogCollectorRecorder {
    fn drop(&mut self) {
        self.close_output_file();
    }
}
