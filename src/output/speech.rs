// 该文件是 Tancha （探查） 项目的一部分。
// src/output/speech.rs - 语音播报
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
  process::{Child, Command, Stdio},
  sync::{Mutex, PoisonError},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::RgbFrame,
  model::DetectResult,
  output::{Overlay, Render},
};

#[derive(Error, Debug)]
pub enum SpeechError {
  #[error("启动语音程序 {0} 失败: {1}")]
  SpawnError(String, std::io::Error),
}

pub trait Speaker: Send + Sync {
  fn speak(&self, text: &str) -> Result<(), SpeechError>;
  fn is_speaking(&self) -> bool;
  fn cancel(&self);
}

impl<S: Speaker + ?Sized> Speaker for Box<S> {
  fn speak(&self, text: &str) -> Result<(), SpeechError> {
    (**self).speak(text)
  }

  fn is_speaking(&self) -> bool {
    (**self).is_speaking()
  }

  fn cancel(&self) {
    (**self).cancel()
  }
}

/// 不发声
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeaker;

impl Speaker for SilentSpeaker {
  fn speak(&self, text: &str) -> Result<(), SpeechError> {
    debug!("静音播报: {}", text);
    Ok(())
  }

  fn is_speaking(&self) -> bool {
    false
  }

  fn cancel(&self) {}
}

/// 调用外部 TTS 程序（如 espeak-ng）播报，文本作为最后一个参数
pub struct CommandSpeaker {
  program: String,
  args: Vec<String>,
  child: Mutex<Option<Child>>,
}

impl CommandSpeaker {
  pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
    Self {
      program: program.into(),
      args,
      child: Mutex::new(None),
    }
  }
}

impl Speaker for CommandSpeaker {
  fn speak(&self, text: &str) -> Result<(), SpeechError> {
    let mut slot = self.child.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(mut previous) = slot.take() {
      let _ = previous.kill();
      let _ = previous.wait();
    }

    let child = Command::new(&self.program)
      .args(&self.args)
      .arg(text)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()
      .map_err(|e| SpeechError::SpawnError(self.program.clone(), e))?;
    *slot = Some(child);
    Ok(())
  }

  fn is_speaking(&self) -> bool {
    let mut slot = self.child.lock().unwrap_or_else(PoisonError::into_inner);
    let finished = match slot.as_mut() {
      Some(child) => !matches!(child.try_wait(), Ok(None)),
      None => return false,
    };
    if finished {
      *slot = None;
    }
    !finished
  }

  fn cancel(&self) {
    let mut slot = self.child.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(mut child) = slot.take() {
      let _ = child.kill();
      let _ = child.wait();
    }
  }
}

impl Drop for CommandSpeaker {
  fn drop(&mut self) {
    self.cancel();
  }
}

/// 播报策略：空闲时播报置信度最高且与上一次不同的标签；
/// 正在播报的标签从画面消失时中断
#[derive(Debug, Default)]
pub struct Announcer {
  last: Mutex<Option<String>>,
}

impl Announcer {
  pub fn announce<S: Speaker + ?Sized>(
    &self,
    result: &DetectResult,
    speaker: &S,
  ) -> Result<Option<String>, SpeechError> {
    let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
    let gone = last.as_deref().is_some_and(|label| !result.contains_label(label));

    if speaker.is_speaking() {
      if gone {
        debug!("{:?} 已离开画面，中断播报", last);
        speaker.cancel();
        *last = None;
      }
      return Ok(None);
    }

    if gone {
      *last = None;
    }

    let Some(best) = result.best() else {
      return Ok(None);
    };
    if last.as_deref() == Some(best.label.as_str()) {
      return Ok(None);
    }

    // 播报失败也记下标签，标签离开画面前不再重试
    *last = Some(best.label.clone());
    speaker.speak(&best.label)?;
    info!("播报: {}", best.label);
    Ok(Some(best.label.clone()))
  }
}

/// 在输出之前做语音播报
pub struct Announce<O, S> {
  inner: O,
  speaker: S,
  announcer: Announcer,
}

impl<O, S: Speaker> Announce<O, S> {
  pub fn new(inner: O, speaker: S) -> Self {
    Self {
      inner,
      speaker,
      announcer: Announcer::default(),
    }
  }
}

impl<O: Render<RgbFrame, Overlay>, S: Speaker> Render<RgbFrame, Overlay> for Announce<O, S> {
  type Error = O::Error;

  fn render_result(&self, frame: &RgbFrame, result: &Overlay) -> Result<(), Self::Error> {
    if let Err(e) = self.announcer.announce(&result.result, &self.speaker) {
      warn!("语音播报失败: {}", e);
    }
    self.inner.render_result(frame, result)
  }
}
