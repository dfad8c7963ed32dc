// =============================================================================
// Adaptive Loss Curve — balance → maximum per-trade loss
// =============================================================================
//
// A monotone hyperbolic mapping from account balance to the largest loss one
// trade may risk, in account currency:
//
//   max_loss_pct(b) = CAP_PCT + (SMALL_PCT - CAP_PCT) / (1 + b / SCALE)
//   max_loss_value(b) = b * max_loss_pct(b)
//
// Small accounts tolerate a larger *percentage* (a $30 account cannot trade
// at 1% risk at all) but a smaller *absolute* loss; large accounts converge
// on a fixed ~1% cap.
// =============================================================================

/// Percentage tolerated by a vanishingly small account.
const SMALL_PCT: f64 = 0.10;
/// Asymptotic cap for large accounts.
const CAP_PCT: f64 = 0.01;
/// Balance at which the tolerated percentage has fallen half way.
const SCALE: f64 = 500.0;

/// Maximum per-trade loss fraction for `balance`.
pub fn max_loss_pct(balance: f64) -> f64 {
    if balance <= 0.0 {
        return 0.0;
    }
    CAP_PCT + (SMALL_PCT - CAP_PCT) / (1.0 + balance / SCALE)
}

/// Maximum per-trade loss in account currency for `balance`.
pub fn max_loss_value(balance: f64) -> f64 {
    balance.max(0.0) * max_loss_pct(balance)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_is_monotone_decreasing() {
        let balances = [10.0, 50.0, 100.0, 400.0, 1_000.0, 10_000.0, 100_000.0];
        for pair in balances.windows(2) {
            assert!(
                max_loss_pct(pair[0]) > max_loss_pct(pair[1]),
                "pct must fall from {} to {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn absolute_value_is_monotone_increasing() {
        let balances = [10.0, 50.0, 100.0, 400.0, 1_000.0, 10_000.0, 100_000.0];
        for pair in balances.windows(2) {
            assert!(
                max_loss_value(pair[0]) < max_loss_value(pair[1]),
                "value must rise from {} to {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn large_accounts_converge_on_one_percent() {
        let pct = max_loss_pct(1_000_000.0);
        assert!((pct - CAP_PCT).abs() < 0.001, "got {pct}");
    }

    #[test]
    fn tiny_accounts_tolerate_larger_percentage() {
        assert!(max_loss_pct(20.0) > 0.08);
    }

    #[test]
    fn degenerate_balance_risks_nothing() {
        assert_eq!(max_loss_value(0.0), 0.0);
        assert_eq!(max_loss_value(-100.0), 0.0);
    }
}
