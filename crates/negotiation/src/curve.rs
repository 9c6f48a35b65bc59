//! Exponential concession schedule for the algorithmic strategies.

use rust_decimal::{Decimal, prelude::FromPrimitive};

/// Price a seller is willing to counter at after `round` of `max_rounds`
/// rounds, starting at `target` and decaying toward `minimum`.
///
/// `risk` scales how quickly the seller concedes (see
/// [`model::Strategy::risk`]). The exponent is evaluated in f64 since the
/// decay factor has no exact decimal representation anyway; the price
/// arithmetic itself stays in decimal space. Callers round the result when
/// they put it on the wire.
pub fn concession(
    target: Decimal,
    minimum: Decimal,
    round: u32,
    max_rounds: u32,
    risk: f64,
) -> Decimal {
    let progress = f64::from(round) / f64::from(max_rounds.max(1));
    let factor = 1.0 - (-0.65 * risk * progress).exp();
    let factor = Decimal::from_f64(factor).unwrap_or(Decimal::ZERO);
    target - (target - minimum) * factor
}

#[cfg(test)]
mod tests {
    use {super::*, model::Strategy, rust_decimal_macros::dec};

    #[test]
    fn starts_at_target() {
        assert_eq!(
            concession(dec!(25), dec!(15), 0, 5, Strategy::Balanced.risk()),
            dec!(25)
        );
    }

    #[test]
    fn non_increasing_in_round() {
        for strategy in [Strategy::Firm, Strategy::Balanced, Strategy::Flexible] {
            let mut previous = dec!(25);
            for round in 1..=5 {
                let price = concession(dec!(25), dec!(15), round, 5, strategy.risk());
                assert!(price <= previous, "{strategy:?} rose at round {round}");
                assert!(price >= dec!(15) && price <= dec!(25));
                previous = price;
            }
        }
    }

    #[test]
    fn riskier_strategies_concede_more() {
        for round in 1..=5 {
            let firm = concession(dec!(25), dec!(15), round, 5, Strategy::Firm.risk());
            let balanced = concession(dec!(25), dec!(15), round, 5, Strategy::Balanced.risk());
            let flexible = concession(dec!(25), dec!(15), round, 5, Strategy::Flexible.risk());
            assert!(firm >= balanced && balanced >= flexible);
        }
    }

    #[test]
    fn known_value() {
        let price = concession(dec!(25), dec!(15), 1, 5, Strategy::Balanced.risk());
        assert_eq!(
            price.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointNearestEven),
            dec!(24.25)
        );
    }
}
