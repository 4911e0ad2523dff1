//! Execution configuration.
//!
//! A config only changes scheduling (how work is split across threads),
//! never results. It is applied for the span of a closure with
//! [`with_config`]; outside of that every operation uses the defaults.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::memory::ARRAY_ALIGN;
use crate::{Result, TesseraError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Allow data-parallel execution at all.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// Total operand bytes above which an operation may run in parallel.
    #[serde(default = "default_parallel_threshold_bytes")]
    pub parallel_threshold_bytes: usize,
    /// Bytes of output handled by one parallel task.
    #[serde(default = "default_bytes_per_task")]
    pub bytes_per_task: usize,
    /// Alignment of newly allocated array buffers.
    #[serde(default = "default_alignment")]
    pub alignment: usize,
}

fn default_parallel() -> bool { true }
fn default_parallel_threshold_bytes() -> usize { 1 << 20 }
fn default_bytes_per_task() -> usize { 1 << 20 }
fn default_alignment() -> usize { ARRAY_ALIGN }

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            parallel_threshold_bytes: default_parallel_threshold_bytes(),
            bytes_per_task: default_bytes_per_task(),
            alignment: default_alignment(),
        }
    }
}

impl ExecConfig {
    /// Sequential execution everywhere.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Default::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: ExecConfig = serde_json::from_str(text)
            .map_err(|e| TesseraError::argument(format!("config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.alignment.is_power_of_two() || self.alignment < 16 {
            return Err(TesseraError::argument(format!(
                "config: alignment {} must be a power of two of at least 16",
                self.alignment
            )));
        }
        if self.bytes_per_task == 0 {
            return Err(TesseraError::argument("config: bytes_per_task must be positive"));
        }
        Ok(())
    }

    /// Whether an operation touching `total_bytes` should split across threads.
    pub fn use_parallel(&self, total_bytes: usize) -> bool {
        self.parallel && total_bytes > self.parallel_threshold_bytes
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<ExecConfig>> = const { RefCell::new(None) };
}

/// Run `f` with `cfg` as the active config on this thread.
pub fn with_config<R>(cfg: ExecConfig, f: impl FnOnce() -> R) -> Result<R> {
    cfg.validate()?;
    let prev = ACTIVE.with(|a| a.replace(Some(cfg)));
    let _restore = Restore(prev);
    Ok(f())
}

struct Restore(Option<ExecConfig>);

impl Drop for Restore {
    fn drop(&mut self) {
        let prev = self.0.take();
        ACTIVE.with(|a| *a.borrow_mut() = prev);
    }
}

/// The config in effect on this thread.
pub fn current() -> ExecConfig {
    ACTIVE.with(|a| a.borrow().clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ExecConfig::default();
        assert!(cfg.parallel);
        assert_eq!(cfg.parallel_threshold_bytes, 1 << 20);
        assert_eq!(cfg.alignment, 64);
        assert!(!cfg.use_parallel(1024));
        assert!(cfg.use_parallel(4 << 20));
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = ExecConfig::from_json(r#"{"parallel_threshold_bytes": 0}"#).unwrap();
        assert_eq!(cfg.parallel_threshold_bytes, 0);
        assert_eq!(cfg.bytes_per_task, 1 << 20);
        assert!(ExecConfig::from_json(r#"{"alignment": 48}"#).is_err());
        assert!(ExecConfig::from_json(r#"{"alignment": 8}"#).is_err());
        assert!(ExecConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_with_config_restores() {
        assert!(current().parallel);
        let inner = with_config(ExecConfig::sequential(), || {
            let nested = with_config(ExecConfig::default(), || current().parallel).unwrap();
            (current().parallel, nested)
        })
        .unwrap();
        assert_eq!(inner, (false, true));
        assert!(current().parallel);
    }
}
