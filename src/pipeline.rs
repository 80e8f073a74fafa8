//! 并发计算图片签名
//!
//! 协调线程把所有图片一次性放进有界队列，启动固定数量的工作线程。工作线程同时等待
//! 停止信号和新任务，计算结果通过结果通道发回协调线程，由协调线程独自写入结果表
//! 和签名索引。
//!
//! 停止时协调线程为每个工作线程发送恰好一个停止信号，等待全部工作线程退出后才
//! 释放任务队列和结果通道。

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use log::{debug, error, info, warn};

use crate::error::{DecodeError, PipelineError};
use crate::index::SignatureIndex;
use crate::loader::ImageLoader;
use crate::metrics;
use crate::signature::{IMAGE_SCALE, Signature, compute_signature};
use crate::types::ImageId;
use crate::utils::{lock, write};

pub type SignatureMap = HashMap<ImageId, Signature>;

/// 单张图片的计算结果，每个任务恰好产生一个
#[derive(Debug)]
pub struct SignatureResult {
    pub id: ImageId,
    pub result: Result<Signature, DecodeError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// 所有图片都已处理
    Completed,
    /// 被中途停止
    Stopped,
}

/// 一次运行的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub total: usize,
    /// 收到的结果数量，包括失败
    pub processed: usize,
    pub failed: usize,
    /// 正常退出并被回收的工作线程数量
    pub workers_joined: usize,
}

enum State {
    Idle,
    Running(Arc<StopSignal>),
}

/// 停止信号，多次触发只会生效一次，每个工作线程恰好收到一个
struct StopSignal {
    tx: Sender<()>,
    workers: usize,
    fired: AtomicBool,
}

impl StopSignal {
    fn new(workers: usize) -> (Self, Receiver<()>) {
        // 容量等于工作线程数量，发送停止信号时不会阻塞
        let (tx, rx) = bounded(workers);
        (Self { tx, workers, fired: AtomicBool::new(false) }, rx)
    }

    /// 返回是否由本次调用触发
    fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        for _ in 0..self.workers {
            let _ = self.tx.send(());
        }
        true
    }
}

/// 运行结束时把状态恢复为空闲，即使中途 panic
struct RunningGuard<'a>(&'a Mutex<State>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = State::Idle;
    }
}

pub struct HashPipeline<L, I> {
    loader: L,
    index: Arc<RwLock<I>>,
    workers: usize,
    state: Mutex<State>,
    last_run: Mutex<Option<RunSummary>>,
}

impl<L, I> HashPipeline<L, I>
where
    L: ImageLoader,
    I: SignatureIndex,
{
    /// 创建流水线，`workers` 为 0 时按 1 处理
    pub fn new(loader: L, index: Arc<RwLock<I>>, workers: usize) -> Self {
        Self {
            loader,
            index,
            workers: workers.max(1),
            state: Mutex::new(State::Idle),
            last_run: Mutex::new(None),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.state), State::Running(_))
    }

    /// 最近一次运行的统计
    pub fn last_run(&self) -> Option<RunSummary> {
        lock(&self.last_run).clone()
    }

    /// 计算所有图片的签名，成功的结果同时加入签名索引
    ///
    /// 单张图片失败只会被记录并跳过。`progress` 只在协调线程中调用，最后一次调用
    /// 一定是 `(total, total)`，且只有这一次。
    pub fn generate_hashes<F>(
        &self,
        images: &[ImageId],
        mut progress: F,
    ) -> Result<SignatureMap, PipelineError>
    where
        F: FnMut(usize, usize),
    {
        let (stop, stop_rx) = {
            let mut state = lock(&self.state);
            if let State::Running(_) = *state {
                warn!("哈希计算正在进行中，忽略本次请求");
                return Err(PipelineError::AlreadyRunning);
            }
            let (stop, stop_rx) = StopSignal::new(self.workers);
            let stop = Arc::new(stop);
            *state = State::Running(stop.clone());
            (stop, stop_rx)
        };
        let _guard = RunningGuard(&self.state);

        // 索引只包含本次运行的签名
        write(&self.index).clear();

        let (signatures, summary) = self.run(images, &stop, stop_rx, &mut progress)?;

        info!(
            "签名计算{}: 共 {} 张，成功 {} 张，失败 {} 张",
            if summary.status == RunStatus::Completed { "完成" } else { "已停止" },
            summary.total,
            signatures.len(),
            summary.failed
        );
        progress(summary.total, summary.total);
        *lock(&self.last_run) = Some(summary);

        Ok(signatures)
    }

    /// 停止正在进行的计算，空闲时什么都不做，重复调用是安全的
    pub fn stop_hashes(&self) {
        match &*lock(&self.state) {
            State::Running(stop) => {
                if stop.fire() {
                    info!("正在停止哈希计算");
                }
            }
            State::Idle => debug!("没有正在进行的哈希计算"),
        }
    }

    fn run<F>(
        &self,
        images: &[ImageId],
        stop: &StopSignal,
        stop_rx: Receiver<()>,
        progress: &mut F,
    ) -> Result<(SignatureMap, RunSummary), PipelineError>
    where
        F: FnMut(usize, usize),
    {
        let total = images.len();
        let mut signatures = SignatureMap::with_capacity(total);
        let mut summary = RunSummary {
            status: RunStatus::Completed,
            total,
            processed: 0,
            failed: 0,
            workers_joined: 0,
        };
        if total == 0 {
            return Ok((signatures, summary));
        }

        info!("开始计算 {} 张图片的签名，线程数 {}", total, self.workers);

        // 队列和结果通道在线程作用域之外创建，保证所有工作线程退出后才会被释放
        let (work_tx, work_rx) = bounded(total);
        for id in images {
            let _ = work_tx.send(*id);
        }
        let (result_tx, result_rx) = unbounded::<SignatureResult>();

        thread::scope(|s| {
            let mut handles = Vec::with_capacity(self.workers);
            for n in 0..self.workers {
                let (work_rx, stop_rx, result_tx) =
                    (work_rx.clone(), stop_rx.clone(), result_tx.clone());
                let loader = &self.loader;
                let handle = thread::Builder::new()
                    .name(format!("hash-worker-{n}"))
                    .spawn_scoped(s, move || worker(loader, work_rx, stop_rx, result_tx));
                match handle {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        error!("创建第 {} 个工作线程失败: {}", n, e);
                        // 已经启动的线程各自收到一个停止信号后退出，由作用域回收
                        stop.fire();
                        return Err(PipelineError::Spawn(e));
                    }
                }
            }
            // 只保留工作线程持有的发送端，全部退出后 recv 会返回错误
            drop(result_tx);

            while summary.processed < total {
                let Ok(SignatureResult { id, result }) = result_rx.recv() else {
                    break;
                };
                summary.processed += 1;
                match result {
                    Ok(signature) => {
                        let signature = signatures.entry(id).insert_entry(signature);
                        write(&self.index).add(id, signature.get());
                        if summary.processed < total {
                            progress(summary.processed, total);
                        }
                    }
                    Err(e) => {
                        summary.failed += 1;
                        warn!("计算图片 {} 的签名失败: {}", id, e);
                    }
                }
            }

            if summary.processed < total {
                summary.status = RunStatus::Stopped;
            }
            stop.fire();

            for handle in handles {
                match handle.join() {
                    Ok(()) => summary.workers_joined += 1,
                    Err(_) => error!("工作线程异常退出"),
                }
            }
            Ok(())
        })?;

        drop(work_tx);
        Ok((signatures, summary))
    }
}

fn worker<L: ImageLoader>(
    loader: &L,
    work_rx: Receiver<ImageId>,
    stop_rx: Receiver<()>,
    result_tx: Sender<SignatureResult>,
) {
    loop {
        let next = select! {
            recv(stop_rx) -> _ => None,
            recv(work_rx) -> msg => msg.ok(),
        };
        let Some(id) = next else {
            break;
        };
        // 两者同时就绪时 select 的选择是随机的，这里保证收到停止信号后不再开始新任务
        if stop_rx.try_recv().is_ok() {
            break;
        }
        let _ = result_tx.send(SignatureResult { id, result: hash_one(loader, id) });
    }
}

/// 解码器内部的 panic 也当作这张图片的错误，保证每个任务都会产生一个结果
fn hash_one<L: ImageLoader>(loader: &L, id: ImageId) -> Result<Signature, DecodeError> {
    let start = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        loader.load_scaled(id, IMAGE_SCALE).map(|image| compute_signature(&image))
    }))
    .unwrap_or_else(|payload| Err(DecodeError::Panicked(panic_message(payload.as_ref()))));
    metrics::inc_hash_count(result.is_ok());
    metrics::observe_hash_duration(start.elapsed().as_secs_f32());
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知错误".to_string()
    }
}
