//! 单元测试模块
//!
//! 游标状态机、调度器、记录器和配置的测试用例

use crate::config::{parse_module, CollectionConfig, ConfigError, ConfigStore, JsonConfigStore};
use crate::cursor::CollectorCursor;
use crate::entry::{LogEntryHeader, RawLogLine};
use crate::header::{ModuleLevel, ModuleTable, TracerType};
use crate::recorder::{LogCollectorRecorder, RecorderError, LOG_FILE_FOOTER};
use crate::scheduler::TaskScheduler;
use crate::VerbosityMask;
use dev_access::{FwTimestamp, FwVersion};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn cursor_at(read_ptr: u32, last_write_ptr: u32, capacity: u32) -> CollectorCursor {
    CollectorCursor {
        read_ptr,
        last_write_ptr,
        buffer_capacity_words: capacity,
        buffer_base_address: 0,
    }
}

fn entry_word(module: u8, level: u8, string_offset: u32, param_count: u8) -> u32 {
    LogEntryHeader {
        signature: 5,
        module,
        level,
        is_string: false,
        string_offset,
        param_count,
    }
    .encode()
}

/// 等待条件成立，超时返回 false
fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ==================== 游标 ====================

#[test]
fn test_cursor_restart_detection() {
    let mut cursor = cursor_at(500, 500, 1024);
    let entries = vec![0u32; 1024];

    let lines = cursor.consume(10, &entries);

    assert_eq!(lines, vec![RawLogLine::DeviceRestarted { new_write_ptr: 10 }]);
    assert_eq!(cursor.read_ptr, 0);
    assert_eq!(cursor.last_write_ptr, 0);
}

#[test]
fn test_cursor_nothing_new() {
    let mut cursor = cursor_at(100, 100, 1024);
    let before = cursor.clone();

    let lines = cursor.consume(100, &vec![0u32; 1024]);

    assert!(lines.is_empty());
    assert_eq!(cursor, before);
}

#[test]
fn test_cursor_overrun_clamp() {
    // 生产者已写到 2000，上次 write_ptr 相同，只做修正不解码
    let mut cursor = cursor_at(0, 2000, 1024);
    let lines = cursor.consume(2000, &vec![0u32; 1024]);

    assert_eq!(lines, vec![RawLogLine::BufferOverrun { missed_words: 976 }]);
    assert_eq!(cursor.read_ptr, 976);
    assert_eq!(cursor.last_write_ptr, 2000);
}

#[test]
fn test_cursor_overrun_then_decode_to_write_ptr() {
    let capacity = 1024;
    let mut entries = vec![0u32; capacity];
    for (i, slot) in entries.iter_mut().enumerate() {
        *slot = entry_word((i % 16) as u8, 1, 0x40, 0);
    }
    let mut cursor = cursor_at(0, 0, capacity as u32);

    let lines = cursor.consume(2000, &entries);

    assert_eq!(lines[0], RawLogLine::BufferOverrun { missed_words: 976 });
    assert_eq!(lines.len(), 1 + capacity);
    assert_eq!(cursor.read_ptr, 2000);
    assert!(cursor.read_ptr - 976 <= capacity as u32);
}

#[test]
fn test_cursor_read_ahead_of_write() {
    let mut cursor = cursor_at(50, 40, 64);
    let lines = cursor.consume(45, &vec![0u32; 64]);

    assert_eq!(lines, vec![RawLogLine::ReadPointerAheadOfWrite]);
    assert_eq!(cursor.read_ptr, 50);
    assert_eq!(cursor.last_write_ptr, 40);
}

#[test]
fn test_cursor_invalid_param_count_advances() {
    let mut entries = vec![0u32; 16];
    entries[0] = entry_word(1, 0, 0, 15);
    let mut cursor = cursor_at(0, 0, 16);

    let lines = cursor.consume(1, &entries);

    assert_eq!(lines, vec![RawLogLine::InvalidSignature]);
    assert_eq!(cursor.read_ptr, 1);
}

#[test]
fn test_cursor_truncated_params_are_skipped() {
    // 条目声明 3 个参数，但生产者只写了 1 个
    let mut entries = vec![0u32; 16];
    entries[0] = entry_word(2, 1, 8, 3);
    entries[1] = 0xDEAD;
    let mut cursor = cursor_at(0, 0, 16);

    let lines = cursor.consume(2, &entries);

    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| *l == RawLogLine::InvalidSignature));
    assert_eq!(cursor.read_ptr, 2);
}

#[test]
fn test_cursor_decodes_across_wrap() {
    let mut entries = vec![0u32; 8];
    entries[6] = entry_word(3, 2, 0x100, 3);
    entries[7] = 11;
    entries[0] = 22;
    entries[1] = 33;
    let mut cursor = cursor_at(6, 6, 8);

    let lines = cursor.consume(10, &entries);

    assert_eq!(
        lines,
        vec![RawLogLine::Normal {
            module: 3,
            level: 2,
            signature: 5,
            string_offset: 0x100,
            is_string: false,
            params: vec![11, 22, 33],
        }]
    );
    assert_eq!(cursor.read_ptr, 10);
    assert_eq!(cursor.last_write_ptr, 10);
}

#[test]
fn test_cursor_random_words_always_progress() {
    let capacity = 256u32;
    let mut seed = 0x1234_5678u32;
    let mut next = move || {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        seed
    };

    let mut cursor = cursor_at(0, 0, capacity);
    let mut write_ptr = 0u32;
    for round in 0..200 {
        let entries: Vec<u32> = (0..capacity).map(|_| next()).collect();
        write_ptr += next() % 400 + 1;

        let lines = cursor.consume(write_ptr, &entries);

        assert!(
            cursor.read_ptr <= write_ptr,
            "round {}: rptr {} > wptr {}",
            round,
            cursor.read_ptr,
            write_ptr
        );
        assert_eq!(cursor.read_ptr, write_ptr, "round {}: stalled", round);
        assert!(!lines.is_empty());
    }
}

#[test]
fn test_cursor_zero_capacity_decodes_nothing() {
    let mut cursor = cursor_at(0, 0, 0);
    let lines = cursor.consume(10, &[]);
    assert!(lines.is_empty());
    assert_eq!(cursor.read_ptr, 0);
}

// ==================== 调度器 ====================

#[test]
fn test_scheduler_repeating_task() {
    let scheduler = TaskScheduler::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    scheduler.register(
        move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        Duration::from_millis(10),
        true,
    );
    scheduler.start().unwrap();

    assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) >= 3));
    scheduler.stop();
    assert!(!scheduler.is_running());
}

#[test]
fn test_scheduler_one_shot_task() {
    let scheduler = TaskScheduler::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let id = scheduler.register(
        move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        Duration::from_millis(5),
        false,
    );
    scheduler.start().unwrap();

    assert!(wait_until(Duration::from_secs(2), || !scheduler.is_registered(id)));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_scheduler_error_keeps_task() {
    let errors = Arc::new(AtomicUsize::new(0));
    let e = errors.clone();
    let scheduler = TaskScheduler::with_error_handler(move |_, _| {
        e.fetch_add(1, Ordering::SeqCst);
    });
    let id = scheduler.register(
        || Err(anyhow::anyhow!("driver not ready")),
        Duration::from_millis(5),
        true,
    );
    scheduler.start().unwrap();

    assert!(wait_until(Duration::from_secs(2), || errors.load(Ordering::SeqCst) >= 3));
    assert!(scheduler.is_registered(id));
}

#[test]
fn test_scheduler_survives_panic() {
    let errors = Arc::new(AtomicUsize::new(0));
    let e = errors.clone();
    let scheduler = TaskScheduler::with_error_handler(move |_, _| {
        e.fetch_add(1, Ordering::SeqCst);
    });
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();

    scheduler.register(|| panic!("boom"), Duration::from_millis(5), true);
    scheduler.register(
        move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        Duration::from_millis(5),
        true,
    );
    scheduler.start().unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        errors.load(Ordering::SeqCst) >= 2 && count.load(Ordering::SeqCst) >= 2
    }));
}

#[test]
fn test_scheduler_unregister_waits_for_running_task() {
    let scheduler = TaskScheduler::new();
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (s, f) = (started.clone(), finished.clone());
    let id = scheduler.register(
        move || {
            s.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
            f.store(true, Ordering::SeqCst);
            Ok(())
        },
        Duration::from_millis(1),
        true,
    );
    scheduler.start().unwrap();

    assert!(wait_until(Duration::from_secs(2), || started.load(Ordering::SeqCst)));
    scheduler.unregister(id);
    assert!(finished.load(Ordering::SeqCst));
    assert!(!scheduler.is_registered(id));

    // 未知 id 直接返回
    scheduler.unregister(id);
}

#[test]
fn test_scheduler_change_interval() {
    let scheduler = TaskScheduler::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let id = scheduler.register(
        move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        Duration::from_millis(5),
        true,
    );
    scheduler.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) >= 1));

    assert!(scheduler.change_interval(id, Duration::from_secs(3600)));
    // 已排好的下一次触发仍按旧间隔执行，之后不再触发
    thread::sleep(Duration::from_millis(50));
    let settled = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(count.load(Ordering::SeqCst), settled);

    scheduler.unregister(id);
    assert!(!scheduler.change_interval(id, Duration::from_millis(5)));
}

#[test]
fn test_scheduler_register_before_start_waits_interval() {
    let scheduler = TaskScheduler::new();
    let fired = Arc::new(AtomicBool::new(false));
    let f = fired.clone();
    scheduler.register(
        move || {
            f.store(true, Ordering::SeqCst);
            Ok(())
        },
        Duration::from_millis(200),
        false,
    );
    scheduler.start().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!fired.load(Ordering::SeqCst));
    assert!(wait_until(Duration::from_secs(2), || fired.load(Ordering::SeqCst)));
}

#[test]
fn test_scheduler_restart_after_stop_from_task() {
    let scheduler = Arc::new(TaskScheduler::new());
    let weak = Arc::downgrade(&scheduler);
    scheduler.register(
        move || {
            if let Some(s) = weak.upgrade() {
                s.stop();
            }
            Ok(())
        },
        Duration::from_millis(5),
        false,
    );
    scheduler.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || !scheduler.is_running()));

    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    scheduler.register(
        move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        Duration::from_millis(5),
        true,
    );
    scheduler.start().unwrap();
    assert!(scheduler.is_running());
    assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) >= 2));
    scheduler.stop();
    assert!(!scheduler.is_running());
}

// ==================== 记录器 ====================

fn recorder_in(dir: &Path) -> LogCollectorRecorder {
    LogCollectorRecorder::new(
        dir,
        "wlan0",
        TracerType::Fw,
        FwVersion {
            major: 5,
            minor: 2,
            sub_minor: 0,
            build: 18,
        },
        FwTimestamp {
            hour: 12,
            min: 30,
            sec: 1,
            day: 7,
            month: 3,
            year: 2019,
        },
    )
}

fn modules_with_third_party(index: usize) -> ModuleTable {
    let mut table = ModuleTable::default();
    table[index] = ModuleLevel {
        verbosity: VerbosityMask::from_bits(VerbosityMask::ERROR),
        third_party: true,
    };
    table
}

fn log_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("wlan0_fw_") && n.ends_with(".log"))
        .collect();
    names.sort();
    names
}

#[test]
fn test_recorder_file_envelope() {
    let tmp = tempfile::tempdir().unwrap();
    let folder = tmp.path().join("logs");
    let config = CollectionConfig {
        output_suffix: "bench".to_string(),
        ..Default::default()
    };
    let mut recorder = recorder_in(&folder);

    recorder
        .prepare_recording(&config, &modules_with_third_party(1))
        .unwrap();
    assert!(folder.is_dir());
    let path = recorder.state().current_file.unwrap();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("wlan0_fw_"));
    assert!(name.ends_with("_bench.log"));

    let lines = vec![RawLogLine::Normal {
        module: 4,
        level: 1,
        signature: 5,
        string_offset: 64,
        is_string: false,
        params: vec![7],
    }];
    assert!(recorder.record_lines(&lines) > 0);
    recorder.stop_recording();
    assert!(!recorder.is_open());

    let content = fs::read_to_string(&path).unwrap();
    println!("{}", content);
    assert!(content.starts_with("<LogFile><FW_Ver><Major>5</Major><Minor>2</Minor>"));
    assert!(content.contains("<Year>2019</Year></Compilation_Time>"));
    assert!(content.contains(
        "<Third_Party_Flags><Flag><value>0</value></Flag><Flag><value>1</value></Flag>"
    ));
    assert!(content.contains("<Log_Content><Logs><Time>"));
    assert!(content.contains("<Content>4,W,64:7,0,0\n</Content>"));
    assert!(content.ends_with(LOG_FILE_FOOTER));
}

#[test]
fn test_recorder_write_without_file() {
    let tmp = tempfile::tempdir().unwrap();
    let mut recorder = recorder_in(tmp.path());
    assert_eq!(recorder.write("orphan line\n", false), 0);
    // 没有打开的文件时停止记录什么也不做
    recorder.stop_recording();
    assert_eq!(recorder.state().current_file_bytes, 0);
}

#[test]
fn test_recorder_error_marker_prefix() {
    let tmp = tempfile::tempdir().unwrap();
    let mut recorder = recorder_in(tmp.path());
    recorder
        .prepare_recording(&CollectionConfig::default(), &ModuleTable::default())
        .unwrap();
    let path = recorder.state().current_file.unwrap();

    let written = recorder.write("device was restarted", true);
    let expected = "\nhost_manager error: fw log tracer error in device wlan0 - device was restarted\n";
    assert_eq!(written, expected.len());
    assert_eq!(recorder.state().current_file_bytes, expected.len() as u64);

    recorder.stop_recording();
    assert!(fs::read_to_string(path).unwrap().contains(expected));
}

#[test]
fn test_recorder_rotation_on_size() {
    let tmp = tempfile::tempdir().unwrap();
    let config = CollectionConfig {
        max_single_file_size_mb: 1,
        ..Default::default()
    };
    let modules = ModuleTable::default();
    let mut recorder = recorder_in(tmp.path());
    recorder.prepare_recording(&config, &modules).unwrap();
    let first = recorder.state().current_file.unwrap();

    let half = "x".repeat(512 * 1024);
    recorder.write(&half, false);
    assert!(!recorder.handle_recording(&config, &modules).unwrap());
    recorder.write(&half, false);
    // 恰好 1MiB 还不算超出
    assert!(!recorder.handle_recording(&config, &modules).unwrap());

    recorder.write("overflow\n", false);
    assert!(recorder.handle_recording(&config, &modules).unwrap());

    let state = recorder.state();
    assert_ne!(state.current_file.as_ref(), Some(&first));
    assert_eq!(state.current_file_bytes, 0);
    assert_eq!(state.file_count_in_folder, 2);
    assert!(!recorder.handle_recording(&config, &modules).unwrap());

    // 旧文件已写入结尾标记
    assert!(fs::read_to_string(&first).unwrap().ends_with(LOG_FILE_FOOTER));
    assert_eq!(log_files(tmp.path()).len(), 2);
}

#[test]
fn test_recorder_unbounded_size_never_rotates() {
    let tmp = tempfile::tempdir().unwrap();
    let config = CollectionConfig {
        max_single_file_size_mb: 0,
        ..Default::default()
    };
    let modules = ModuleTable::default();
    let mut recorder = recorder_in(tmp.path());
    recorder.prepare_recording(&config, &modules).unwrap();

    recorder.write(&"y".repeat(2 * 1024 * 1024), false);
    assert!(!recorder.handle_recording(&config, &modules).unwrap());
    assert_eq!(log_files(tmp.path()).len(), 1);
}

#[test]
fn test_recorder_eviction_bound() {
    let tmp = tempfile::tempdir().unwrap();
    // 其他追踪核和其他类型的文件不参与计数
    fs::write(tmp.path().join("wlan0_ucode_2000_01_01.log"), "keep").unwrap();
    fs::write(tmp.path().join("wlan0_fw_notes.txt"), "keep").unwrap();

    let config = CollectionConfig {
        max_single_file_size_mb: 1,
        max_num_files: 3,
        ..Default::default()
    };
    let modules = ModuleTable::default();
    let mut recorder = recorder_in(tmp.path());
    recorder.prepare_recording(&config, &modules).unwrap();

    let chunk = "z".repeat(1024 * 1024 + 1);
    let mut created = vec![recorder.state().current_file.unwrap()];
    for _ in 0..8 {
        recorder.write(&chunk, false);
        assert!(recorder.handle_recording(&config, &modules).unwrap());
        created.push(recorder.state().current_file.unwrap());

        let files = log_files(tmp.path());
        assert!(files.len() <= 3, "too many files: {:?}", files);
    }
    recorder.stop_recording();

    // 剩下的是最新的 3 个
    let expected: Vec<String> = created[created.len() - 3..]
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(log_files(tmp.path()), expected);
    assert!(tmp.path().join("wlan0_ucode_2000_01_01.log").exists());
    assert!(tmp.path().join("wlan0_fw_notes.txt").exists());
}

#[test]
fn test_recorder_prepare_counts_existing_files() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("wlan0_fw_1999_01_01__00_00_00_000000_.log"), "old").unwrap();
    fs::write(tmp.path().join("wlan0_fw_1999_01_02__00_00_00_000000_.log"), "old").unwrap();

    let config = CollectionConfig {
        max_num_files: 2,
        ..Default::default()
    };
    let mut recorder = recorder_in(tmp.path());
    recorder.prepare_recording(&config, &ModuleTable::default()).unwrap();
    assert_eq!(recorder.state().file_count_in_folder, 3);

    let removed = recorder.remove_old_files_if_needed(&config);
    assert_eq!(removed, 2);
    assert!(!tmp
        .path()
        .join("wlan0_fw_1999_01_01__00_00_00_000000_.log")
        .exists());
    assert_eq!(recorder.state().file_count_in_folder, 1);
}

/// 每次写都报错的输出目标
struct FullDisk;

impl std::io::Write for FullDisk {
    fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_recorder_write_failure_closes_file() {
    let tmp = tempfile::tempdir().unwrap();
    let mut recorder = recorder_in(tmp.path());
    recorder.attach_output(tmp.path().join("full.log"), Box::new(FullDisk));
    assert!(recorder.is_open());

    // 超过缓冲区容量，直接落到底层写
    let big = "w".repeat(64 * 1024);
    assert_eq!(recorder.write(&big, false), 0);
    assert!(!recorder.is_open());
    assert_eq!(recorder.state().current_file_bytes, 0);
    assert_eq!(recorder.write("after failure\n", false), 0);

    recorder
        .prepare_recording(&CollectionConfig::default(), &ModuleTable::default())
        .unwrap();
    assert!(recorder.is_open());
    assert_eq!(recorder.write("resumed\n", false), "resumed\n".len());
}

#[test]
fn test_recorder_prepare_fails_when_folder_is_a_file() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("logs");
    fs::write(&blocker, "not a folder").unwrap();

    let mut recorder = recorder_in(&blocker);
    let err = recorder
        .prepare_recording(&CollectionConfig::default(), &ModuleTable::default())
        .unwrap_err();
    println!("{}", err);
    assert!(matches!(err, RecorderError::CreateFolder { .. }));
    assert!(!recorder.is_open());
    assert_eq!(recorder.state().current_file, None);
}

#[test]
fn test_recorder_failed_prepare_closes_previous_file() {
    let tmp = tempfile::tempdir().unwrap();
    let mut recorder = recorder_in(tmp.path());
    recorder
        .prepare_recording(&CollectionConfig::default(), &ModuleTable::default())
        .unwrap();
    let first = recorder.state().current_file.unwrap();

    // 文件名超过文件系统允许的长度，打开失败
    let config = CollectionConfig {
        output_suffix: "n".repeat(300),
        ..Default::default()
    };
    let err = recorder
        .prepare_recording(&config, &ModuleTable::default())
        .unwrap_err();
    assert!(matches!(err, RecorderError::OpenFile { .. }));
    assert!(!recorder.is_open());
    assert_eq!(recorder.write("dropped\n", false), 0);

    assert!(fs::read_to_string(&first).unwrap().ends_with(LOG_FILE_FOOTER));
    assert_eq!(log_files(tmp.path()).len(), 1);
}

#[test]
fn test_recorder_eviction_stops_at_first_failed_removal() {
    let tmp = tempfile::tempdir().unwrap();
    // 与日志同名的目录无法用删除文件的方式删掉
    let stuck = tmp.path().join("wlan0_fw_1999_01_01__00_00_00_000000_.log");
    fs::create_dir(&stuck).unwrap();
    fs::write(stuck.join("inner"), "x").unwrap();
    let next = tmp.path().join("wlan0_fw_1999_01_02__00_00_00_000000_.log");
    fs::write(&next, "old").unwrap();

    let config = CollectionConfig {
        max_num_files: 2,
        ..Default::default()
    };
    let mut recorder = recorder_in(tmp.path());
    recorder.prepare_recording(&config, &ModuleTable::default()).unwrap();
    assert_eq!(recorder.state().file_count_in_folder, 3);

    assert_eq!(recorder.remove_old_files_if_needed(&config), 0);
    assert!(stuck.is_dir());
    assert!(next.exists());
    assert_eq!(recorder.state().file_count_in_folder, 3);
    assert!(recorder.is_open());
}

// ==================== 配置 ====================

#[test]
fn test_config_defaults() {
    let config = CollectionConfig::default();
    assert_eq!(config.polling_interval_ms, 100);
    assert_eq!(config.max_single_file_size_mb, 10);
    assert_eq!(config.max_num_files, 0);
    assert!(config.output_suffix.is_empty());
    assert!(config.module_verbosity.iter().all(|v| v.to_string() == "EW"));
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation() {
    let zero = CollectionConfig {
        polling_interval_ms: 0,
        ..Default::default()
    };
    assert!(matches!(
        zero.validate(),
        Err(ConfigError::InvalidPollingInterval(0))
    ));

    let too_slow = CollectionConfig {
        polling_interval_ms: 3_600_001,
        ..Default::default()
    };
    assert!(too_slow.validate().is_err());

    let bad_suffix = CollectionConfig {
        output_suffix: "../escape".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        bad_suffix.validate(),
        Err(ConfigError::InvalidSuffix(_))
    ));
}

#[test]
fn test_verbosity_mask_parse() {
    let mask: VerbosityMask = "ewi".parse().unwrap();
    assert_eq!(mask.bits(), 0x7);
    assert_eq!(mask.to_string(), "EWI");
    assert_eq!("VE".parse::<VerbosityMask>().unwrap().to_string(), "EV");
    assert_eq!("".parse::<VerbosityMask>().unwrap().bits(), 0);
    assert!("EX".parse::<VerbosityMask>().is_err());
}

#[test]
fn test_parse_module_names() {
    assert_eq!(parse_module("Module3").unwrap(), 3);
    assert_eq!(parse_module("15").unwrap(), 15);
    assert!(parse_module("Module16").is_err());
    assert!(parse_module("radio").is_err());
}

#[test]
fn test_json_config_store() {
    let tmp = tempfile::tempdir().unwrap();
    let store = JsonConfigStore::new(tmp.path().join("cfg"));

    // 文件不存在时使用默认配置
    assert_eq!(
        store.load("wlan0", TracerType::Ucode).unwrap(),
        CollectionConfig::default()
    );

    let mut config = CollectionConfig {
        polling_interval_ms: 250,
        max_single_file_size_mb: 2,
        max_num_files: 5,
        output_suffix: "night".to_string(),
        ..Default::default()
    };
    config.module_verbosity[7] = "EWIV".parse().unwrap();
    store.save("wlan0", TracerType::Ucode, &config).unwrap();

    let path = store.path_for("wlan0", TracerType::Ucode);
    assert!(path.ends_with("wlan0_ucode_log_collector.json"));
    let json = fs::read_to_string(&path).unwrap();
    println!("{}", json);
    assert!(json.contains("\"EWIV\""));

    assert_eq!(store.load("wlan0", TracerType::Ucode).unwrap(), config);
    // 另一个追踪核互不影响
    assert_eq!(
        store.load("wlan0", TracerType::Fw).unwrap(),
        CollectionConfig::default()
    );
}

#[test]
fn test_json_config_store_rejects_garbage() {
    let tmp = tempfile::tempdir().unwrap();
    let store = JsonConfigStore::new(tmp.path());
    fs::write(store.path_for("wlan0", TracerType::Fw), "{ not json").unwrap();
    assert!(matches!(
        store.load("wlan0", TracerType::Fw),
        Err(ConfigError::Format { .. })
    ));

    fs::write(
        store.path_for("wlan0", TracerType::Fw),
        r#"{"polling_interval_ms": 0}"#,
    )
    .unwrap();
    assert!(matches!(
        store.load("wlan0", TracerType::Fw),
        Err(ConfigError::InvalidPollingInterval(0))
    ));
}

#[test]
fn test_json_config_partial_file_uses_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let store = JsonConfigStore::new(tmp.path());
    fs::write(
        store.path_for("wlan0", TracerType::Fw),
        r#"{"max_num_files": 4}"#,
    )
    .unwrap();

    let config = store.load("wlan0", TracerType::Fw).unwrap();
    assert_eq!(config.max_num_files, 4);
    assert_eq!(config.polling_interval_ms, 100);
}
