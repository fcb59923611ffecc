//! Validation utilities

use bigdecimal::BigDecimal;

use crate::types::*;

fn invalid(message: String) -> LedgerError {
    LedgerError::Validation(vec![message])
}

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: &BigDecimal) -> LedgerResult<()> {
    if *amount <= BigDecimal::from(0) {
        Err(invalid(format!("Amount {} must be positive", amount)))
    } else {
        Ok(())
    }
}

/// Validate that an amount does not carry more decimals than the currency allows
pub fn validate_amount_precision(amount: &BigDecimal, currency: &Currency) -> LedgerResult<()> {
    if currency.fits_precision(amount) {
        Ok(())
    } else {
        Err(invalid(format!(
            "Amount {} exceeds {} precision of {} decimals",
            amount, currency.code, currency.decimals
        )))
    }
}

/// Validate that an account code is valid
pub fn validate_account_code(code: &str) -> LedgerResult<()> {
    if code.trim().is_empty() {
        return Err(invalid("Account code cannot be empty".to_string()));
    }

    if code.len() > 50 {
        return Err(invalid(
            "Account code cannot exceed 50 characters".to_string(),
        ));
    }

    // Alphanumeric segments separated by dots, dashes or underscores ("1001.USD")
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    {
        return Err(invalid(format!(
            "Account code '{}' can only contain alphanumeric characters, dots, dashes, \
             and underscores",
            code
        )));
    }

    Ok(())
}

/// Validate that an account name is valid
pub fn validate_account_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(invalid("Account name cannot be empty".to_string()));
    }

    if name.len() > 100 {
        return Err(invalid(
            "Account name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Whether two amounts are equal within `tolerance`
pub fn within_tolerance(left: &BigDecimal, right: &BigDecimal, tolerance: &BigDecimal) -> bool {
    (left - right).abs() <= *tolerance
}

/// Tolerance used for a currency: the configured epsilon, but never coarser
/// than one minor unit of the currency
pub fn tolerance_for(currency: Option<&Currency>, epsilon: &BigDecimal) -> BigDecimal {
    match currency {
        Some(currency) => {
            let unit = currency.minor_unit();
            if unit < *epsilon {
                unit
            } else {
                epsilon.clone()
            }
        }
        None => epsilon.clone(),
    }
}
