// 该文件是 Tancha （探查） 项目的一部分。
// src/task.rs - 检测循环与会话生命周期
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  fmt::Display,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use tokio::{
  sync::watch,
  task::JoinHandle,
  time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, error, info, warn};

use crate::{
  frame::RgbFrame,
  input::FrameSource,
  model::{Model, ModelProvider},
  output::{Overlay, OverlayStyle, Render, Surface, SurfaceSize, plan_overlay},
};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct LoopConfig {
  pub interval: Duration,
  /// 连续推理失败达到该次数后暂停循环，`None` 表示一直重试
  pub max_consecutive_failures: Option<u32>,
  /// 渲染达到该帧数后结束循环
  pub frame_limit: Option<u64>,
  pub style: OverlayStyle,
}

impl Default for LoopConfig {
  fn default() -> Self {
    Self {
      interval: DEFAULT_TICK_INTERVAL,
      max_consecutive_failures: None,
      frame_limit: None,
      style: OverlayStyle::default(),
    }
  }
}

impl LoopConfig {
  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_max_consecutive_failures(mut self, max: Option<u32>) -> Self {
    self.max_consecutive_failures = max;
    self
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  pub fn with_style(mut self, style: OverlayStyle) -> Self {
    self.style = style;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Loading,
  Running,
  LoadFailed,
  Paused,
  Stopped,
}

impl Phase {
  pub fn is_terminal(self) -> bool {
    matches!(self, Phase::LoadFailed | Phase::Paused | Phase::Stopped)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickStats {
  pub ticks: u64,
  pub not_ready: u64,
  pub skipped_in_flight: u64,
  pub inferences: u64,
  pub failures: u64,
  pub consecutive_failures: u32,
  pub rendered: u64,
  pub render_failures: u64,
  /// 会话结束后才返回、被丢弃的推理结果
  pub dropped: u64,
}

/// 会话状态，由生命周期控制器持有，各状态转换都在这里完成
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
  pub phase: Phase,
  /// 首次取到就绪帧之前为 true
  pub loading: bool,
  pub surface: Surface,
  pub stats: TickStats,
}

impl Default for SessionState {
  fn default() -> Self {
    Self {
      phase: Phase::Loading,
      loading: true,
      surface: Surface::default(),
      stats: TickStats::default(),
    }
  }
}

impl SessionState {
  fn model_loaded(&mut self) {
    if self.phase == Phase::Loading {
      self.phase = Phase::Running;
    }
  }

  fn load_failed(&mut self) {
    self.phase = Phase::LoadFailed;
  }

  /// 返回是否为第一次就绪
  fn frame_ready(&mut self, width: u32, height: u32) -> bool {
    let first = self.loading;
    self.loading = false;
    self.surface.resize(width, height);
    first
  }

  fn finish(&mut self, phase: Phase) {
    if !self.phase.is_terminal() {
      self.phase = phase;
    }
  }
}

/// 取消标记，循环启动时捕获，每次绘制前检查
#[derive(Debug, Clone)]
pub struct CancelToken {
  tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
  fn default() -> Self {
    Self {
      tx: Arc::new(watch::Sender::new(false)),
    }
  }
}

impl CancelToken {
  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.tx.borrow()
  }

  pub async fn cancelled(&self) {
    let mut rx = self.tx.subscribe();
    let _ = rx.wait_for(|cancelled| *cancelled).await;
  }
}

/// 同一时刻最多一个推理在进行
#[derive(Debug, Clone, Default)]
struct InFlight(Arc<AtomicBool>);

impl InFlight {
  fn try_acquire(&self) -> Option<InFlightGuard> {
    self
      .0
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| InFlightGuard(self.0.clone()))
  }
}

#[derive(Debug)]
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
  NotReady,
  InFlight,
  Dispatched,
  Cancelled,
}

struct DetectionLoop<M, S, R> {
  model: Arc<M>,
  source: S,
  render: R,
  config: LoopConfig,
  state: Arc<watch::Sender<SessionState>>,
  cancel: CancelToken,
  in_flight: InFlight,
}

impl<M, S, R> DetectionLoop<M, S, R>
where
  M: Model,
  S: FrameSource + 'static,
  R: Render<RgbFrame, Overlay> + Send + Sync + 'static,
  R::Error: Display,
{
  fn tick(self: &Arc<Self>) -> TickOutcome {
    if self.cancel.is_cancelled() {
      return TickOutcome::Cancelled;
    }

    let dimensions = match self.source.dimensions() {
      Some(dimensions) if self.source.ready_state().is_ready() => dimensions,
      _ => {
        self.state.send_modify(|s| {
          s.stats.ticks += 1;
          s.stats.not_ready += 1;
        });
        return TickOutcome::NotReady;
      }
    };

    let (width, height) = dimensions;
    let mut first = false;
    self.state.send_modify(|s| {
      s.stats.ticks += 1;
      first = s.frame_ready(width, height);
    });
    if first {
      info!("帧来源就绪: {}x{}", width, height);
    }

    let Some(guard) = self.in_flight.try_acquire() else {
      debug!("上一次推理尚未完成，跳过本次");
      self.state.send_modify(|s| s.stats.skipped_in_flight += 1);
      return TickOutcome::InFlight;
    };

    let Some(frame) = self.source.capture() else {
      debug!("帧来源暂无可用帧");
      self.state.send_modify(|s| s.stats.not_ready += 1);
      return TickOutcome::NotReady;
    };

    self.state.send_modify(|s| s.stats.inferences += 1);
    tokio::spawn(self.clone().infer(frame, guard));
    TickOutcome::Dispatched
  }

  async fn infer(self: Arc<Self>, frame: RgbFrame, _guard: InFlightGuard) {
    let now = Instant::now();
    let result = match self.model.detect(&frame).await {
      Ok(result) => result,
      Err(e) => {
        error!("推理失败: {}", e);
        let mut exhausted = None;
        self.state.send_modify(|s| {
          s.stats.failures += 1;
          s.stats.consecutive_failures += 1;
          exhausted = self
            .config
            .max_consecutive_failures
            .filter(|&max| s.stats.consecutive_failures >= max);
        });
        if let Some(max) = exhausted {
          error!("连续 {} 次推理失败，暂停检测循环", max);
          self.finish(Phase::Paused);
        }
        return;
      }
    };

    if self.cancel.is_cancelled() {
      debug!("会话已结束，丢弃 {} 个检测结果", result.len());
      self.state.send_modify(|s| s.stats.dropped += 1);
      return;
    }
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    let mut surface = SurfaceSize::default();
    self.state.send_modify(|s| {
      s.stats.consecutive_failures = 0;
      surface = s.surface.size();
    });

    let overlay = plan_overlay(result, surface, &self.config.style);
    // 编码、写文件与启动播报程序都会阻塞
    let render = {
      let this = self.clone();
      tokio::task::spawn_blocking(move || {
        this
          .render
          .render_result(&frame, &overlay)
          .map_err(|e| e.to_string())
      })
    };
    let rendered = match render.await {
      Ok(rendered) => rendered,
      Err(e) => Err(format!("渲染任务异常退出: {}", e)),
    };
    if let Err(e) = rendered {
      warn!("渲染失败: {}", e);
      self.state.send_modify(|s| s.stats.render_failures += 1);
      return;
    }

    let mut limit_reached = None;
    self.state.send_modify(|s| {
      s.stats.rendered += 1;
      limit_reached = self.config.frame_limit.filter(|&n| s.stats.rendered >= n);
    });
    if let Some(n) = limit_reached {
      info!("达到指定帧数 {}, 退出任务循环", n);
      self.finish(Phase::Stopped);
    }
  }

  fn finish(&self, phase: Phase) {
    self.cancel.cancel();
    self.state.send_modify(|s| s.finish(phase));
  }
}

/// 生命周期控制器
#[derive(Debug, Clone, Default)]
pub struct Controller {
  config: LoopConfig,
}

impl Controller {
  pub fn new(config: LoopConfig) -> Self {
    Self { config }
  }

  /// 加载模型，成功后立即检测一次，随后按固定间隔检测
  pub fn mount<P, S, R>(&self, provider: P, source: S, render: R) -> SessionHandle
  where
    P: ModelProvider,
    S: FrameSource + 'static,
    R: Render<RgbFrame, Overlay> + Send + Sync + 'static,
    R::Error: Display,
  {
    let state = Arc::new(watch::Sender::new(SessionState::default()));
    let cancel = CancelToken::default();
    let task = tokio::spawn(run_session(
      provider,
      source,
      render,
      self.config.clone(),
      state.clone(),
      cancel.clone(),
    ));

    SessionHandle {
      state,
      cancel,
      task,
    }
  }
}

async fn run_session<P, S, R>(
  provider: P,
  source: S,
  render: R,
  config: LoopConfig,
  state: Arc<watch::Sender<SessionState>>,
  cancel: CancelToken,
) where
  P: ModelProvider,
  S: FrameSource + 'static,
  R: Render<RgbFrame, Overlay> + Send + Sync + 'static,
  R::Error: Display,
{
  info!("正在加载模型...");
  let now = Instant::now();
  let model = match provider.load().await {
    Ok(model) => Arc::new(model),
    Err(e) => {
      // 不重试，会话保持加载中
      error!("模型加载失败: {}", e);
      state.send_modify(SessionState::load_failed);
      return;
    }
  };
  if cancel.is_cancelled() {
    info!("会话已销毁，不再启动检测循环");
    return;
  }
  info!("模型加载完成，耗时: {:.2?}", now.elapsed());
  state.send_modify(SessionState::model_loaded);

  let period = config.interval;
  let detection = Arc::new(DetectionLoop {
    model,
    source,
    render,
    config,
    state,
    cancel: cancel.clone(),
    in_flight: InFlight::default(),
  });

  detection.tick();

  let mut ticker = interval_at(Instant::now() + period, period);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
  info!("开始检测，间隔 {:?}", period);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,
      _ = ticker.tick() => {
        if detection.tick() == TickOutcome::Cancelled {
          break;
        }
      }
    }
  }
  debug!("检测定时器退出");
}

/// 会话句柄，销毁或被释放时停止定时器
pub struct SessionHandle {
  state: Arc<watch::Sender<SessionState>>,
  cancel: CancelToken,
  task: JoinHandle<()>,
}

impl SessionHandle {
  pub fn state(&self) -> SessionState {
    self.state.borrow().clone()
  }

  pub fn is_loading(&self) -> bool {
    self.state.borrow().loading
  }

  pub fn subscribe(&self) -> watch::Receiver<SessionState> {
    self.state.subscribe()
  }

  /// 等待状态满足条件
  pub async fn wait_for(&self, condition: impl FnMut(&SessionState) -> bool) -> SessionState {
    let mut rx = self.state.subscribe();
    match rx.wait_for(condition).await {
      Ok(state) => state.clone(),
      Err(_) => self.state(),
    }
  }

  /// 取消定时器；已经在进行的推理不会被中断，其结果会被丢弃
  pub fn teardown(&self) {
    if !self.cancel.is_cancelled() {
      info!("销毁检测会话");
    }
    self.cancel.cancel();
    self.task.abort();
    self.state.send_modify(|s| s.finish(Phase::Stopped));
  }
}

impl Drop for SessionHandle {
  fn drop(&mut self) {
    self.teardown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_ready_clears_loading_once() {
    let mut state = SessionState::default();
    assert!(state.loading);
    assert!(state.frame_ready(640, 480));
    assert!(!state.frame_ready(640, 480));
    assert!(!state.loading);
    assert_eq!(state.surface.size(), SurfaceSize::new(640, 480));
    assert_eq!(state.surface.resizes(), 1);
  }

  #[test]
  fn terminal_phase_is_kept() {
    let mut state = SessionState::default();
    state.load_failed();
    state.model_loaded();
    state.finish(Phase::Stopped);
    assert_eq!(state.phase, Phase::LoadFailed);
    assert!(state.loading);
  }

  #[test]
  fn in_flight_guard_is_exclusive() {
    let in_flight = InFlight::default();
    let guard = in_flight.try_acquire().unwrap();
    assert!(in_flight.try_acquire().is_none());
    drop(guard);
    assert!(in_flight.try_acquire().is_some());
  }

  #[tokio::test]
  async fn cancel_token_wakes_waiters() {
    let token = CancelToken::default();
    let waiter = {
      let token = token.clone();
      tokio::spawn(async move { token.cancelled().await })
    };
    assert!(!token.is_cancelled());
    token.cancel();
    waiter.await.unwrap();
    assert!(token.is_cancelled());
    // 已取消时立即返回
    token.cancelled().await;
  }
}
