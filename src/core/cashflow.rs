use super::types::{SavingsPlan, SimulationConfig, TaxMode, TaxSettings, WithdrawalPeriod};

#[derive(Debug, Clone, Copy)]
pub struct CashFlowPlan<'a> {
    pub savings: &'a SavingsPlan,
    pub withdrawals: &'a [WithdrawalPeriod],
    pub inflation_rate: f64,
    pub taxes: &'a TaxSettings,
}

impl<'a> CashFlowPlan<'a> {
    pub fn from_config(config: &'a SimulationConfig) -> Self {
        Self {
            savings: &config.savings,
            withdrawals: &config.withdrawals,
            inflation_rate: config.effective_inflation(),
            taxes: &config.taxes,
        }
    }
}

/// Signed cash flow for a 1-indexed `year`: positive is a contribution,
/// negative a withdrawal.
///
/// Years up to `savings_years` contribute a share of inflated income. Later
/// years withdraw the first matching period's inflated amount, grossed up
/// for tax and capped at what the portfolio holds.
pub fn resolve_cash_flow(plan: &CashFlowPlan<'_>, year: u32, portfolio_value: f64) -> f64 {
    let inflation_factor = price_index(plan.inflation_rate, year);

    if year <= plan.savings.savings_years {
        return plan.savings.current_income * inflation_factor * (plan.savings.savings_rate / 100.0);
    }

    let Some(period) = find_withdrawal_period(plan.withdrawals, year) else {
        return 0.0;
    };
    let net = period.annual_amount * inflation_factor;
    let gross = gross_up_withdrawal(net, plan.taxes, inflation_factor);
    let withdrawn = gross.min(portfolio_value.max(0.0));
    if withdrawn > 0.0 { -withdrawn } else { 0.0 }
}

pub fn find_withdrawal_period(periods: &[WithdrawalPeriod], year: u32) -> Option<&WithdrawalPeriod> {
    periods.iter().find(|p| p.contains(year))
}

pub fn gross_up_withdrawal(net: f64, taxes: &TaxSettings, price_index: f64) -> f64 {
    if !taxes.include_taxes || net <= 0.0 {
        return net;
    }
    net / (1.0 - effective_tax_rate(net, taxes, price_index) / 100.0)
}

/// Average rate in percent on `amount`. Bracket thresholds are in today's
/// money and scaled by `price_index`.
pub fn effective_tax_rate(amount: f64, taxes: &TaxSettings, price_index: f64) -> f64 {
    match taxes.mode {
        TaxMode::Flat => taxes.tax_rate,
        TaxMode::Brackets => {
            if amount <= 0.0 {
                return 0.0;
            }
            bracket_tax(amount, taxes, price_index) / amount * 100.0
        }
    }
}

fn bracket_tax(amount: f64, taxes: &TaxSettings, price_index: f64) -> f64 {
    // Thresholds must already be ascending; see `TaxSettings::sort_brackets`.
    let brackets = &taxes.brackets;
    let mut tax = 0.0;
    for (idx, bracket) in brackets.iter().enumerate() {
        let lower = (bracket.threshold * price_index).max(0.0);
        let upper = brackets
            .get(idx + 1)
            .map(|next| (next.threshold * price_index).max(lower))
            .unwrap_or(f64::INFINITY);
        let taxable = (amount.min(upper) - lower).max(0.0);
        tax += taxable * bracket.rate / 100.0;
    }
    tax
}

fn price_index(inflation_rate: f64, year: u32) -> f64 {
    (1.0 + inflation_rate).powi(year.saturating_sub(1) as i32)
}
