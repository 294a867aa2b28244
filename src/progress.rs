//! 进度与取消
//!
//! 批量扫描只在记录之间检查进度接收器，返回 `EspError::Cancelled` 即取消。

use crate::utils::Result;

/// 进度接收器
pub trait Progress {
    /// 报告完成比例（0.0 到 1.0）与当前标签
    fn report(&mut self, fraction: f64, label: &str) -> Result<()>;
}

/// 忽略所有进度
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn report(&mut self, _fraction: f64, _label: &str) -> Result<()> {
        Ok(())
    }
}

/// 把闭包当作进度接收器
pub struct FnProgress<F>(pub F);

impl<F> Progress for FnProgress<F>
where
    F: FnMut(f64, &str) -> Result<()>,
{
    fn report(&mut self, fraction: f64, label: &str) -> Result<()> {
        (self.0)(fraction, label)
    }
}

/// 把 [0, 1] 映射到父进度的一个子区间
pub struct SubProgress<'a> {
    parent: &'a mut dyn Progress,
    start: f64,
    end: f64,
}

impl<'a> SubProgress<'a> {
    pub fn new(parent: &'a mut dyn Progress, start: f64, end: f64) -> Self {
        SubProgress { parent, start, end }
    }
}

impl Progress for SubProgress<'_> {
    fn report(&mut self, fraction: f64, label: &str) -> Result<()> {
        let fraction = fraction.clamp(0.0, 1.0);
        self.parent
            .report(self.start + (self.end - self.start) * fraction, label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_progress_maps_range() {
        let mut seen = Vec::new();
        {
            let mut outer = FnProgress(|f: f64, label: &str| {
                seen.push((f, label.to_string()));
                Ok(())
            });
            let mut sub = SubProgress::new(&mut outer, 0.5, 1.0);
            sub.report(0.0, "a.esp").unwrap();
            sub.report(0.5, "a.esp").unwrap();
            sub.report(2.0, "a.esp").unwrap();
        }
        let fractions: Vec<f64> = seen.iter().map(|(f, _)| *f).collect();
        assert_eq!(fractions, vec![0.5, 0.75, 1.0]);
        assert_eq!(seen[0].1, "a.esp");
    }

    #[test]
    fn test_closure_can_cancel() {
        let mut progress = FnProgress(|f: f64, _: &str| if f > 0.5 { Err(crate::utils::EspError::Cancelled) } else { Ok(()) });
        assert!(progress.report(0.1, "").is_ok());
        assert!(progress.report(0.9, "").unwrap_err().is_cancelled());
    }
}
