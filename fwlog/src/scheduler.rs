//! 周期任务调度器
//!
//! 单个后台线程按触发时间顺序串行执行所有任务，任意两个任务（包括同一任务的两次调用）
//! 不会并发执行。任务返回错误或 panic 时交给错误处理回调，任务本身保持注册。
//!
//! `unregister` 具有 join 语义：若任务正在执行，会阻塞到本次执行结束，
//! 调用方随后可以安全销毁任务闭包引用的状态。

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// 任务标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

type Callback = Box<dyn FnMut() -> anyhow::Result<()> + Send>;
type ErrorHandler = Arc<dyn Fn(TaskId, &anyhow::Error) + Send + Sync>;

struct ScheduledTask {
    interval: Duration,
    repeating: bool,
    next_fire_time: Instant,
    callback: Arc<Mutex<Callback>>,
}

#[derive(Default)]
struct State {
    tasks: HashMap<TaskId, ScheduledTask>,
    /// (触发时间, 任务)；过期条目在弹出时按 next_fire_time 比对丢弃
    queue: BinaryHeap<Reverse<(Instant, TaskId)>>,
    running: Option<TaskId>,
    next_id: u64,
    started: bool,
    stopping: bool,
    worker: Option<ThreadId>,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    on_error: ErrorHandler,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 周期任务调度器
pub struct TaskScheduler {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    /// 使用默认错误处理（warn 日志）
    pub fn new() -> Self {
        Self::with_error_handler(|id, err| {
            warn!("scheduler: {} failed: {:#}", id, err);
        })
    }

    pub fn with_error_handler<F>(on_error: F) -> Self
    where
        F: Fn(TaskId, &anyhow::Error) + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                cond: Condvar::new(),
                on_error: Arc::new(on_error),
            }),
            handle: Mutex::new(None),
        }
    }

    /// 注册任务，首次触发在 `interval` 之后
    pub fn register<F>(&self, callback: F, interval: Duration, repeating: bool) -> TaskId
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let mut state = self.shared.lock();
        state.next_id += 1;
        let id = TaskId(state.next_id);
        let next_fire_time = Instant::now() + interval;
        state.tasks.insert(
            id,
            ScheduledTask {
                interval,
                repeating,
                next_fire_time,
                callback: Arc::new(Mutex::new(Box::new(callback))),
            },
        );
        state.queue.push(Reverse((next_fire_time, id)));
        debug!(
            "scheduler: registered {} (interval {:?}, repeating {})",
            id, interval, repeating
        );
        self.shared.cond.notify_all();
        id
    }

    /// 注销任务；若任务正在执行则等待其结束。未知 id 直接返回。
    pub fn unregister(&self, id: TaskId) {
        let mut state = self.shared.lock();
        if state.tasks.remove(&id).is_none() {
            return;
        }
        debug!("scheduler: unregistered {}", id);
        // 任务在自己的回调里注销自己时不能等待
        let on_worker = state.worker == Some(thread::current().id());
        while state.running == Some(id) && !on_worker {
            state = self
                .shared
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.shared.cond.notify_all();
    }

    /// 修改间隔，从任务下一次触发之后生效
    pub fn change_interval(&self, id: TaskId, interval: Duration) -> bool {
        let mut state = self.shared.lock();
        match state.tasks.get_mut(&id) {
            Some(task) => {
                debug!(
                    "scheduler: {} interval {:?} -> {:?}",
                    id, task.interval, interval
                );
                task.interval = interval;
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: TaskId) -> bool {
        self.shared.lock().tasks.contains_key(&id)
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().started
    }

    /// 启动后台执行线程，重复调用无副作用
    pub fn start(&self) -> std::io::Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.shared.lock();
            if state.started {
                return Ok(());
            }
            state.started = true;
            state.stopping = false;
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("task-scheduler".to_string())
            .spawn(move || run_loop(shared));
        match spawned {
            Ok(h) => {
                *handle = Some(h);
                info!("scheduler: started");
                Ok(())
            }
            Err(e) => {
                self.shared.lock().started = false;
                Err(e)
            }
        }
    }

    /// 停止后台线程并等待其退出（正在执行的任务会先执行完）
    pub fn stop(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.shared.lock();
            if !state.started {
                return;
            }
            state.stopping = true;
            self.shared.cond.notify_all();
        }
        if let Some(h) = handle.take() {
            if h.thread().id() == thread::current().id() {
                // 在任务内部调用 stop，只能交给线程自行退出
                return;
            }
            if h.join().is_err() {
                warn!("scheduler: worker thread panicked");
            }
        }
        let mut state = self.shared.lock();
        state.started = false;
        state.worker = None;
        info!("scheduler: stopped");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: Arc<Shared>) {
    let mut state = shared.lock();
    state.worker = Some(thread::current().id());

    loop {
        if state.stopping {
            break;
        }

        let Some(Reverse((fire_time, id))) = state.queue.peek().copied() else {
            state = shared.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
            continue;
        };

        // 已注销或已改期的条目直接丢弃
        let live = matches!(state.tasks.get(&id), Some(t) if t.next_fire_time == fire_time);
        if !live {
            state.queue.pop();
            continue;
        }

        let now = Instant::now();
        if fire_time > now {
            state = shared
                .cond
                .wait_timeout(state, fire_time - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        state.queue.pop();
        let callback = match state.tasks.get(&id) {
            Some(task) => task.callback.clone(),
            None => continue,
        };
        state.running = Some(id);
        drop(state);

        let outcome = {
            let mut cb = callback.lock().unwrap_or_else(PoisonError::into_inner);
            panic::catch_unwind(AssertUnwindSafe(|| (*cb)()))
        };
        drop(callback);
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => (shared.on_error)(id, &err),
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                (shared.on_error)(id, &anyhow::anyhow!("task panicked: {}", msg));
            }
        }

        state = shared.lock();
        state.running = None;
        let reschedule = match state.tasks.get_mut(&id) {
            Some(task) if task.repeating => {
                task.next_fire_time = Instant::now() + task.interval;
                Some(task.next_fire_time)
            }
            Some(_) => None,
            None => None,
        };
        match reschedule {
            Some(next) => state.queue.push(Reverse((next, id))),
            None => {
                state.tasks.remove(&id);
            }
        }
        shared.cond.notify_all();
    }

    // 任务内部 stop 时没有人 join，由线程自己复位，之后可以再次 start
    state.started = false;
    state.stopping = false;
    state.worker = None;
    debug!("scheduler: loop exited");
}
