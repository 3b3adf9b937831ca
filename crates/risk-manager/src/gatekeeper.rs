//! Risk Gatekeeper
//!
//! Resolves a signal into an order for one account, or rejects it.
//! Stateless: everything that changes between calls arrives in the
//! [`RiskContext`].

use crate::parameters::RiskLimits;
use copytrade_core::{ExchangeAccount, IdempotencyKey, OrderSpec, Signal, Subscription};
use log::{info, warn};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use thiserror::Error;

/// Account snapshot observed at approval time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskContext {
    /// Available balance in the quote currency
    pub balance: Decimal,
    pub open_positions: u32,
    pub trades_today: u32,
    /// Smallest order notional the exchange accepts
    pub min_notional: Decimal,
}

/// Why a target was not approved
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRejection {
    #[error("TOO_MANY_POSITIONS: {open} open, limit {limit}")]
    TooManyPositions { open: u32, limit: u32 },

    #[error("DAILY_LIMIT: {trades} trades today, limit {limit}")]
    DailyLimit { trades: u32, limit: u32 },

    #[error("BELOW_MIN_NOTIONAL: notional {notional} below exchange minimum {minimum}")]
    BelowMinNotional { notional: Decimal, minimum: Decimal },
}

impl RiskRejection {
    pub fn code(&self) -> &'static str {
        match self {
            RiskRejection::TooManyPositions { .. } => "TOO_MANY_POSITIONS",
            RiskRejection::DailyLimit { .. } => "DAILY_LIMIT",
            RiskRejection::BelowMinNotional { .. } => "BELOW_MIN_NOTIONAL",
        }
    }
}

/// A requested value the gatekeeper had to bring within limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    SizeClamped { requested: Decimal, applied: Decimal },
    LeverageClamped { requested: u32, applied: u32 },
}

/// Approved order plus the adjustments made to reach it
#[derive(Debug, Clone, PartialEq)]
pub struct Approval {
    pub spec: OrderSpec,
    pub adjustments: Vec<Adjustment>,
}

/// Applies [`RiskLimits`] to execution targets
#[derive(Debug, Clone)]
pub struct RiskGatekeeper {
    limits: RiskLimits,
}

impl RiskGatekeeper {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Evaluate one (signal, account) pairing
    pub fn evaluate(
        &self,
        signal: &Signal,
        account: &ExchangeAccount,
        subscription: &Subscription,
        context: RiskContext,
    ) -> Result<Approval, RiskRejection> {
        let result = self.resolve(signal, account, subscription, context);
        match &result {
            Ok(approval) => {
                for adjustment in &approval.adjustments {
                    info!("[RISK ADJUSTED] {} {}: {:?}", signal.id, account.id, adjustment);
                }
            }
            Err(rejection) => {
                warn!("[RISK REJECTED] {} {}: {}", signal.id, account.id, rejection);
            }
        }
        result
    }

    fn resolve(
        &self,
        signal: &Signal,
        account: &ExchangeAccount,
        subscription: &Subscription,
        context: RiskContext,
    ) -> Result<Approval, RiskRejection> {
        let mut adjustments = Vec::new();

        // 1. Open positions
        if context.open_positions >= self.limits.max_open_positions {
            return Err(RiskRejection::TooManyPositions {
                open: context.open_positions,
                limit: self.limits.max_open_positions,
            });
        }

        // 2. Trade frequency
        if context.trades_today >= self.limits.max_daily_trades {
            return Err(RiskRejection::DailyLimit {
                trades: context.trades_today,
                limit: self.limits.max_daily_trades,
            });
        }

        // 3. Size: a ceiling, not a hard failure
        let requested_size = subscription.size_percent.unwrap_or(signal.size_percent);
        let size_percent = requested_size.min(self.limits.size_cap());
        if size_percent != requested_size {
            adjustments.push(Adjustment::SizeClamped {
                requested: requested_size,
                applied: size_percent,
            });
        }

        let quantity = position_quantity(
            context.balance,
            size_percent,
            signal.entry_price,
            self.limits.quantity_precision,
        );
        let notional = quantity * signal.entry_price;
        if quantity <= Decimal::ZERO || notional < context.min_notional {
            return Err(RiskRejection::BelowMinNotional {
                notional,
                minimum: context.min_notional,
            });
        }

        // 4. Leverage
        let cap = self.limits.leverage_cap(subscription.max_leverage);
        let leverage = signal.leverage.clamp(1, cap);
        if leverage != signal.leverage {
            adjustments.push(Adjustment::LeverageClamped {
                requested: signal.leverage,
                applied: leverage,
            });
        }

        Ok(Approval {
            spec: OrderSpec {
                key: IdempotencyKey::derive(signal.id, account.id),
                symbol: signal.symbol.clone(),
                side: signal.side,
                quantity,
                leverage,
                reference_price: signal.entry_price,
                stop_loss: signal.stop_loss,
                take_profit: signal.take_profit,
                size_percent,
            },
            adjustments,
        })
    }
}

/// `balance × size% ÷ entry`, rounded toward zero
///
/// Rounding down keeps the notional at or below the sized share of the
/// balance.
pub fn position_quantity(
    balance: Decimal,
    size_percent: Decimal,
    entry_price: Decimal,
    precision: u32,
) -> Decimal {
    if entry_price <= Decimal::ZERO || balance <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (balance * size_percent / dec!(100) / entry_price)
        .round_dp_with_strategy(precision, RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use copytrade_core::{ExchangeId, Side, SignalId};

    fn btc_signal(size_percent: Decimal, leverage: u32) -> Signal {
        Signal::new(
            SignalId(1),
            "BTCUSDT",
            Side::Long,
            dec!(35000),
            dec!(34000),
            dec!(37000),
            leverage,
            size_percent,
            Utc::now(),
        )
    }

    fn context(balance: Decimal) -> RiskContext {
        RiskContext {
            balance,
            open_positions: 0,
            trades_today: 0,
            min_notional: dec!(5),
        }
    }

    fn account() -> ExchangeAccount {
        ExchangeAccount::new(1, ExchangeId::Binance).with_balance(dec!(10000))
    }

    #[test]
    fn test_approves_and_sizes() {
        let gatekeeper = RiskGatekeeper::new(RiskLimits::default());
        let account = account();
        let approval = gatekeeper
            .evaluate(&btc_signal(dec!(5), 10), &account, &Subscription::new(1), context(dec!(10000)))
            .unwrap();

        // 10000 × 5% = 500 USDT / 35000 = 0.01428.. → 0.014
        assert_eq!(approval.spec.quantity, dec!(0.014));
        assert_eq!(approval.spec.leverage, 10);
        assert_eq!(approval.spec.key, IdempotencyKey::derive(SignalId(1), account.id));
        assert!(approval.adjustments.is_empty());
    }

    #[test]
    fn test_size_above_cap_is_clamped_not_rejected() {
        let gatekeeper = RiskGatekeeper::new(RiskLimits::default());
        let subscription = Subscription::new(1).with_size_percent(dec!(15));
        let approval = gatekeeper
            .evaluate(&btc_signal(dec!(5), 10), &account(), &subscription, context(dec!(10000)))
            .unwrap();

        assert_eq!(approval.spec.size_percent, dec!(10));
        assert_eq!(approval.spec.quantity, dec!(0.028));
        assert_eq!(
            approval.adjustments,
            vec![Adjustment::SizeClamped {
                requested: dec!(15),
                applied: dec!(10)
            }]
        );

        // Same outcome when the signal itself asks for too much
        let approval = gatekeeper
            .evaluate(&btc_signal(dec!(15), 10), &account(), &Subscription::new(1), context(dec!(10000)))
            .unwrap();
        assert_eq!(approval.spec.size_percent, dec!(10));
    }

    #[test]
    fn test_notional_never_exceeds_ten_percent_of_balance() {
        let gatekeeper = RiskGatekeeper::new(RiskLimits::default());
        for (balance, size) in [
            (dec!(1234.56), dec!(10)),
            (dec!(99999), dec!(15)),
            (dec!(350.01), dec!(9.99)),
            (dec!(777777.7), dec!(50)),
        ] {
            let approval = gatekeeper
                .evaluate(&btc_signal(size, 10), &account(), &Subscription::new(1), context(balance))
                .unwrap();
            assert!(approval.spec.notional() <= balance * dec!(0.10));
        }
    }

    #[test]
    fn test_rule_order() {
        let gatekeeper = RiskGatekeeper::new(RiskLimits {
            max_open_positions: 2,
            max_daily_trades: 3,
            ..Default::default()
        });
        let signal = btc_signal(dec!(5), 10);
        let subscription = Subscription::new(1);

        // Every rule fails; position count is reported first
        let all_bad = RiskContext {
            balance: dec!(1),
            open_positions: 2,
            trades_today: 3,
            min_notional: dec!(5),
        };
        let rejection = gatekeeper
            .evaluate(&signal, &account(), &subscription, all_bad)
            .unwrap_err();
        assert_eq!(rejection.code(), "TOO_MANY_POSITIONS");

        let rejection = gatekeeper
            .evaluate(&signal, &account(), &subscription, RiskContext { open_positions: 1, ..all_bad })
            .unwrap_err();
        assert_eq!(rejection, RiskRejection::DailyLimit { trades: 3, limit: 3 });

        let rejection = gatekeeper
            .evaluate(
                &signal,
                &account(),
                &subscription,
                RiskContext {
                    open_positions: 1,
                    trades_today: 0,
                    ..all_bad
                },
            )
            .unwrap_err();
        assert_eq!(rejection.code(), "BELOW_MIN_NOTIONAL");
    }

    #[test]
    fn test_below_min_notional() {
        let gatekeeper = RiskGatekeeper::new(RiskLimits::default());
        let mut ctx = context(dec!(1000));
        ctx.min_notional = dec!(100);

        // 1000 × 5% = 50 USDT of notional, rounded to 0.001 BTC = 35
        let rejection = gatekeeper
            .evaluate(&btc_signal(dec!(5), 10), &account(), &Subscription::new(1), ctx)
            .unwrap_err();
        assert_eq!(
            rejection,
            RiskRejection::BelowMinNotional {
                notional: dec!(35.000),
                minimum: dec!(100)
            }
        );
    }

    #[test]
    fn test_leverage_clamped_to_account_max() {
        let gatekeeper = RiskGatekeeper::new(RiskLimits::default());
        let subscription = Subscription::new(1).with_max_leverage(5);
        let approval = gatekeeper
            .evaluate(&btc_signal(dec!(5), 20), &account(), &subscription, context(dec!(10000)))
            .unwrap();
        assert_eq!(approval.spec.leverage, 5);
        assert_eq!(
            approval.adjustments,
            vec![Adjustment::LeverageClamped {
                requested: 20,
                applied: 5
            }]
        );

        let approval = gatekeeper
            .evaluate(&btc_signal(dec!(5), 0), &account(), &Subscription::new(1), context(dec!(10000)))
            .unwrap();
        assert_eq!(approval.spec.leverage, 1);
    }

    #[test]
    fn test_position_quantity_edge_cases() {
        assert_eq!(position_quantity(dec!(0), dec!(5), dec!(100), 3), Decimal::ZERO);
        assert_eq!(position_quantity(dec!(100), dec!(5), dec!(0), 3), Decimal::ZERO);
        assert_eq!(position_quantity(dec!(1000), dec!(10), dec!(3), 0), dec!(33));
    }
}
