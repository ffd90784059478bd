//! Salary component calculation.
//!
//! Computes per-component amounts (fixed / percentage of contract basic /
//! pluggable formula rule) and accumulates them into the payroll buckets.
//! Component amounts round to cents; the derived payroll totals round to
//! whole currency units, with `net` computed from the rounded operands so
//! the stored identity holds exactly.

use crate::models::{
    ComponentKind, Contract, DeductionKind, EarningKind, Employee, SalaryComponent,
};
use crate::store::NewPayrollLine;
use chrono::NaiveDate;
use gateway_core::GatewayError;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::sync::Arc;

/// Pluggable business rule for `formula` components. The core embeds no
/// labor-law math beyond fixed and percentage.
pub trait SalaryRule: Send + Sync {
    fn compute(
        &self,
        component: &SalaryComponent,
        employee: &Employee,
        month: NaiveDate,
        contract: &Contract,
    ) -> Result<Decimal, GatewayError>;
}

/// Formula rules registered by component code.
#[derive(Clone, Default)]
pub struct RuleSet {
    rules: HashMap<String, Arc<dyn SalaryRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, code: &str, rule: Arc<dyn SalaryRule>) {
        self.rules.insert(code.to_string(), rule);
    }

    fn get(&self, code: &str) -> Option<&Arc<dyn SalaryRule>> {
        self.rules.get(code)
    }
}

/// Round to cents, half away from zero.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to whole currency units, half away from zero.
pub fn round_unit(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Cent-precision bucket sums of the computed components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayrollBuckets {
    pub basic: Decimal,
    pub allowances: Decimal,
    pub overtime: Decimal,
    pub bonus: Decimal,
    pub insurance: Decimal,
    pub tax: Decimal,
    pub absence: Decimal,
    pub late: Decimal,
    pub other: Decimal,
}

impl PayrollBuckets {
    pub fn earnings_total(&self) -> Decimal {
        self.basic + self.allowances + self.overtime + self.bonus
    }

    /// Component deductions; the advance deduction is accumulated
    /// separately by advance coordination.
    pub fn deductions_total(&self) -> Decimal {
        self.insurance + self.tax + self.absence + self.late + self.other
    }
}

/// Whole-unit derived totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayrollTotals {
    pub gross: Decimal,
    pub total_additions: Decimal,
    pub total_deductions: Decimal,
    pub net: Decimal,
}

/// Derive the stored totals: each operand rounded to whole units
/// (half-up), net computed from the rounded operands.
pub fn derive_totals(buckets: &PayrollBuckets, advance_deduction: Decimal) -> PayrollTotals {
    let gross = round_unit(buckets.basic + buckets.allowances);
    let total_additions = round_unit(buckets.overtime + buckets.bonus);
    let total_deductions = round_unit(buckets.deductions_total() + advance_deduction);
    PayrollTotals {
        gross,
        total_additions,
        total_deductions,
        net: gross + total_additions - total_deductions,
    }
}

/// Compute every effective component and fold it into its bucket.
/// Returns the payroll lines (one per non-zero component) and the bucket
/// sums.
pub fn compute_components(
    components: &[SalaryComponent],
    employee: &Employee,
    month: NaiveDate,
    contract: &Contract,
    rules: &RuleSet,
) -> Result<(Vec<NewPayrollLine>, PayrollBuckets), GatewayError> {
    let mut lines = Vec::with_capacity(components.len());
    let mut buckets = PayrollBuckets::default();

    for component in components {
        let kind = component.parsed_kind().ok_or_else(|| {
            GatewayError::Validation(anyhow::anyhow!(
                "Component '{}' has unknown kind '{}'",
                component.code,
                component.kind
            ))
        })?;
        let method = component.parsed_method().ok_or_else(|| {
            GatewayError::Validation(anyhow::anyhow!(
                "Component '{}' has unknown method '{}'",
                component.code,
                component.method
            ))
        })?;

        let amount = match method {
            crate::models::CalculationMethod::Fixed => component.amount,
            crate::models::CalculationMethod::Percentage => {
                round_cents(contract.basic_salary * component.amount / Decimal::from(100))
            }
            crate::models::CalculationMethod::Formula => {
                let rule = rules.get(&component.code).ok_or_else(|| {
                    GatewayError::Validation(anyhow::anyhow!(
                        "No rule registered for formula component '{}'",
                        component.code
                    ))
                })?;
                round_cents(rule.compute(component, employee, month, contract)?)
            }
        };

        if amount < Decimal::ZERO {
            return Err(GatewayError::Validation(anyhow::anyhow!(
                "Component '{}' computed a negative amount {}",
                component.code,
                amount
            )));
        }

        // Bucket routing is resolved once here, by code, never re-branched
        // downstream.
        match kind {
            ComponentKind::Earning => match EarningKind::from_code(&component.code) {
                EarningKind::Basic => buckets.basic += amount,
                EarningKind::Allowance => buckets.allowances += amount,
                EarningKind::Overtime => buckets.overtime += amount,
                EarningKind::Bonus => buckets.bonus += amount,
            },
            ComponentKind::Deduction => match DeductionKind::from_code(&component.code) {
                DeductionKind::Insurance => buckets.insurance += amount,
                DeductionKind::Tax => buckets.tax += amount,
                DeductionKind::Absence => buckets.absence += amount,
                DeductionKind::Late => buckets.late += amount,
                DeductionKind::Advance | DeductionKind::Other => buckets.other += amount,
            },
        }

        if !amount.is_zero() {
            lines.push(NewPayrollLine {
                component_code: component.code.clone(),
                name: component.name.clone(),
                kind,
                amount,
            });
        }
    }

    Ok((lines, buckets))
}

/// Consistency check before persisting: line sums must match the bucket
/// aggregates to the cent.
pub fn verify_lines(
    lines: &[NewPayrollLine],
    buckets: &PayrollBuckets,
    advance_deduction: Decimal,
) -> Result<(), GatewayError> {
    let tolerance = Decimal::new(1, 2);

    let earning_sum: Decimal = lines
        .iter()
        .filter(|l| l.kind == ComponentKind::Earning)
        .map(|l| l.amount)
        .sum();
    let deduction_sum: Decimal = lines
        .iter()
        .filter(|l| l.kind == ComponentKind::Deduction)
        .map(|l| l.amount)
        .sum();

    if (earning_sum - buckets.earnings_total()).abs() > tolerance {
        return Err(GatewayError::InternalError(anyhow::anyhow!(
            "Earning lines ({}) disagree with computed earnings ({})",
            earning_sum,
            buckets.earnings_total()
        )));
    }
    let expected_deductions = buckets.deductions_total() + advance_deduction;
    if (deduction_sum - expected_deductions).abs() > tolerance {
        return Err(GatewayError::InternalError(anyhow::anyhow!(
            "Deduction lines ({}) disagree with computed deductions ({})",
            deduction_sum,
            expected_deductions
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn employee() -> Employee {
        Employee {
            employee_id: Uuid::new_v4(),
            staff_code: "E-001".to_string(),
            full_name: "Test Employee".to_string(),
            active: true,
            created_utc: Utc::now(),
        }
    }

    fn contract(basic: i64) -> Contract {
        Contract {
            contract_id: Uuid::new_v4(),
            employee_id: Uuid::new_v4(),
            basic_salary: Decimal::from(basic),
            start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            end_date: None,
            active: true,
        }
    }

    fn component(code: &str, kind: &str, method: &str, amount: Decimal) -> SalaryComponent {
        SalaryComponent {
            component_id: Uuid::new_v4(),
            code: code.to_string(),
            name: code.to_string(),
            kind: kind.to_string(),
            method: method.to_string(),
            amount,
            effective_from: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            effective_to: None,
            active: true,
        }
    }

    fn month() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn fixed_and_percentage_components_fill_buckets() {
        let components = vec![
            component("BASIC_SALARY", "earning", "fixed", Decimal::from(5000)),
            component("HOUSING", "earning", "fixed", Decimal::from(1000)),
            component("SOCIAL_INSURANCE", "deduction", "percentage", Decimal::from(11)),
        ];

        let (lines, buckets) = compute_components(
            &components,
            &employee(),
            month(),
            &contract(5000),
            &RuleSet::new(),
        )
        .unwrap();

        assert_eq!(lines.len(), 3);
        assert_eq!(buckets.basic, Decimal::from(5000));
        assert_eq!(buckets.allowances, Decimal::from(1000));
        // 11% of 5000.
        assert_eq!(buckets.insurance, Decimal::from(550));

        let totals = derive_totals(&buckets, Decimal::ZERO);
        assert_eq!(totals.gross, Decimal::from(6000));
        assert_eq!(totals.total_deductions, Decimal::from(550));
        assert_eq!(totals.net, Decimal::from(5450));

        verify_lines(&lines, &buckets, Decimal::ZERO).unwrap();
    }

    #[test]
    fn percentage_rounds_to_cents_half_up() {
        let components = vec![component(
            "SOCIAL_INSURANCE",
            "deduction",
            "percentage",
            Decimal::new(75, 1), // 7.5%
        )];
        let (_, buckets) = compute_components(
            &components,
            &employee(),
            month(),
            &contract(3333),
            &RuleSet::new(),
        )
        .unwrap();
        // 7.5% of 3333 = 249.975 -> 249.98.
        assert_eq!(buckets.insurance, Decimal::new(24998, 2));
    }

    #[test]
    fn formula_without_registered_rule_fails_validation() {
        let components = vec![component("SHIFT_PREMIUM", "earning", "formula", Decimal::ZERO)];
        let err = compute_components(
            &components,
            &employee(),
            month(),
            &contract(5000),
            &RuleSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn registered_formula_rule_is_applied() {
        struct Halved;
        impl SalaryRule for Halved {
            fn compute(
                &self,
                _component: &SalaryComponent,
                _employee: &Employee,
                _month: NaiveDate,
                contract: &Contract,
            ) -> Result<Decimal, GatewayError> {
                Ok(contract.basic_salary / Decimal::from(2))
            }
        }

        let mut rules = RuleSet::new();
        rules.register("SHIFT_PREMIUM", Arc::new(Halved));

        let components = vec![component("SHIFT_PREMIUM", "earning", "formula", Decimal::ZERO)];
        let (_, buckets) =
            compute_components(&components, &employee(), month(), &contract(5000), &rules)
                .unwrap();
        assert_eq!(buckets.allowances, Decimal::from(2500));
    }

    #[test]
    fn zero_amount_components_produce_no_lines() {
        let components = vec![
            component("BASIC_SALARY", "earning", "fixed", Decimal::from(5000)),
            component("BONUS", "earning", "fixed", Decimal::ZERO),
        ];
        let (lines, _) = compute_components(
            &components,
            &employee(),
            month(),
            &contract(5000),
            &RuleSet::new(),
        )
        .unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn whole_unit_rounding_is_half_up() {
        assert_eq!(round_unit(Decimal::new(54505, 1)), Decimal::from(5451)); // 5450.5
        assert_eq!(round_unit(Decimal::new(54504, 1)), Decimal::from(5450)); // 5450.4
    }
}
