//! Plain-text rendering of a distribution report

use copytrade_order_manager::{DistributionReport, TargetEntry, TargetReport};
use std::fmt::Write;

/// One line per account, in resolution order
pub fn target_line(target: &TargetReport) -> String {
    let mut line = format!(
        "user {:>4}  {:<8} {:<28}",
        target.user_id,
        target.exchange.to_string(),
        target.label()
    );

    if let TargetEntry::Executed(result) = &target.entry {
        if let Some(price) = result.filled_price {
            let _ = write!(line, " {} @ {}", result.filled_quantity, price);
        }
        if result.retries() > 0 {
            let _ = write!(line, " retries={}", result.retries());
        }
        if let Some(error) = &result.error {
            let _ = write!(line, " error=\"{error}\"");
        }
    }

    if target.needs_attention() {
        line.push_str("  !! UNPROTECTED");
    }
    line
}

/// Summary header followed by the per-account breakdown
pub fn render(report: &DistributionReport) -> String {
    let mut out = format!(
        "signal {} -> {} ({}/{} filled)\n",
        report.signal_id,
        report.status,
        report.filled(),
        report.targets.len()
    );
    for target in &report.targets {
        out.push_str("  ");
        out.push_str(&target_line(target));
        out.push('\n');
    }

    let unprotected = report.unprotected();
    if !unprotected.is_empty() {
        let _ = writeln!(
            out,
            "{} account(s) hold a position without full protection",
            unprotected.len()
        );
    }
    out
}
