use wgpu::{Adapter, Instance, Surface};

use crate::error::EngineError;
use crate::gpu::PowerMode;

/// One way of asking the instance for an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterStrategy {
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback: bool,
}

/// GPU recovery strategies for initialization failures
pub struct GpuRecovery;

impl GpuRecovery {
    /// Strategies in the order they are tried: the configured preference,
    /// the remaining preferences, then the software fallback adapter
    pub fn adapter_strategies(preferred: PowerMode) -> Vec<AdapterStrategy> {
        let first = preferred.to_wgpu();
        let mut strategies = vec![AdapterStrategy {
            power_preference: first,
            force_fallback: false,
        }];

        for power_preference in [
            wgpu::PowerPreference::HighPerformance,
            wgpu::PowerPreference::LowPower,
            wgpu::PowerPreference::None,
        ] {
            if power_preference != first {
                strategies.push(AdapterStrategy {
                    power_preference,
                            force_fallback: false,
                });
            }
        }

        strategies.push(AdapterStrategy {
            power_preference: wgpu::PowerPreference::None,
            force_fallback: true,
        });
        strategies
    }

    /// Select exactly one adapter that can present to `surface`.
    ///
    /// Headless callers pass no surface and get any working adapter.
    pub async fn select_adapter(
        instance: &Instance,
        surface: Option<&Surface<'_>>,
        preferred: PowerMode,
    ) -> Option<Adapter> {
        for (i, strategy) in Self::adapter_strategies(preferred).iter().enumerate() {
            log::debug!(
                "[GpuRecovery::select_adapter] Strategy {}: {:?} power, fallback {}",
                i + 1,
                strategy.power_preference,
                strategy.force_fallback
            );

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: strategy.power_preference,
                    compatible_surface: surface,
                    force_fallback_adapter: strategy.force_fallback,
                })
                .await;

            if let Some(adapter) = adapter {
                if i > 0 {
                    log::warn!(
                        "[GpuRecovery::select_adapter] Preferred adapter unavailable, using strategy {}",
                        i + 1
                    );
                }
                if strategy.force_fallback {
                    log::warn!("[GpuRecovery::select_adapter] Using fallback adapter - performance will be limited");
                }
                return Some(adapter);
            }
        }

        log::error!("[GpuRecovery::select_adapter] All adapter strategies failed");
        None
    }

    /// Software adapters trace very slowly; worth a warning at start-up
    pub fn is_software_adapter(info: &wgpu::AdapterInfo) -> bool {
        info.device_type == wgpu::DeviceType::Cpu
    }
}

/// Tracks back-to-back frame failures
#[derive(Debug)]
pub struct FrameHealthMonitor {
    consecutive: u32,
    total: u64,
    threshold: u32,
}

impl FrameHealthMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            total: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record a failed frame. Returns true once the streak reaches the threshold.
    pub fn record_failure(&mut self, error: &EngineError) -> bool {
        self.consecutive += 1;
        self.total += 1;

        log::warn!(
            "[FrameHealthMonitor] Frame failed ({} in a row, {} total): {}",
            self.consecutive,
            self.total,
            error
        );
        self.is_streak()
    }

    pub fn record_success(&mut self) {
        if self.consecutive > 0 {
            log::info!(
                "[FrameHealthMonitor] Recovered after {} failed frame(s)",
                self.consecutive
            );
        }
        self.consecutive = 0;
    }

    pub fn is_streak(&self) -> bool {
        self.consecutive >= self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn total_failures(&self) -> u64 {
        self.total
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameStage;

    #[test]
    fn test_strategies_start_with_preference_and_end_with_fallback() {
        let strategies = GpuRecovery::adapter_strategies(PowerMode::LowPower);
        assert_eq!(strategies[0].power_preference, wgpu::PowerPreference::LowPower);
        assert_eq!(strategies.len(), 4);
        assert!(strategies.last().map(|s| s.force_fallback).unwrap_or(false));
        assert_eq!(
            strategies
                .iter()
                .filter(|s| s.power_preference == wgpu::PowerPreference::LowPower)
                .count(),
            1
        );
    }

    #[test]
    fn test_only_last_strategy_forces_fallback() {
        for preferred in [PowerMode::HighPerformance, PowerMode::LowPower] {
            let strategies = GpuRecovery::adapter_strategies(preferred);
            let forced: Vec<_> = strategies.iter().map(|s| s.force_fallback).collect();
            assert_eq!(forced, vec![false, false, false, true]);
        }
    }

    #[test]
    fn test_streak_reaches_threshold() {
        let mut monitor = FrameHealthMonitor::new(3);
        let err = EngineError::frame(FrameStage::Waiting, 1, "device lost");
        assert!(!monitor.record_failure(&err));
        assert!(!monitor.record_failure(&err));
        assert!(monitor.record_failure(&err));
        assert_eq!(monitor.consecutive_failures(), 3);
    }

    #[test]
    fn test_success_breaks_streak() {
        let mut monitor = FrameHealthMonitor::new(3);
        let err = EngineError::frame(FrameStage::Acquiring, 1, "barrier");
        monitor.record_failure(&err);
        monitor.record_failure(&err);
        monitor.record_success();
        assert!(!monitor.record_failure(&err));
        assert_eq!(monitor.consecutive_failures(), 1);
        assert_eq!(monitor.total_failures(), 3);
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        assert_eq!(FrameHealthMonitor::new(0).threshold(), 1);
    }
}
