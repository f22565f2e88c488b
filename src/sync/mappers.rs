//! Provider taxonomy mapping.
//!
//! Total functions: provider vocabularies evolve, and an unknown value must
//! degrade to a fixed fallback rather than block a sync.

use crate::models::AccountType;

/// Fallback category for unrecognized provider categories.
pub const UNCATEGORIZED: &str = "Uncategorized";

pub fn map_account_type(provider_type: &str) -> AccountType {
    match provider_type {
        "TRANSACTION" | "SAVINGS" => AccountType::Bank,
        "CREDIT_CARD" => AccountType::Credit,
        "LOAN" | "MORTGAGE" => AccountType::Loan,
        "INVESTMENT" | "PENSION" => AccountType::Investment,
        other => {
            tracing::debug!(provider_type = other, "Unknown provider account type");
            AccountType::Other
        }
    }
}

pub fn map_transaction_category(provider_category: &str) -> String {
    let mapped = match provider_category {
        "BILLS_AND_SERVICES" => "Bills",
        "ENTERTAINMENT" => "Entertainment",
        "EXPENSES" => "Miscellaneous",
        "FAMILY" => "Family",
        "FOOD_AND_DRINK" => "Food & Dining",
        "GENERAL" => "Miscellaneous",
        "INCOME" => "Income",
        "PAYMENTS" => "Transfers",
        "SAVINGS_AND_INVESTMENTS" => "Investments",
        "SHOPPING" => "Shopping",
        "TRANSPORT" => "Transportation",
        "TRAVEL" => "Travel",
        other => {
            tracing::debug!(provider_category = other, "Unknown provider category");
            UNCATEGORIZED
        }
    };
    mapped.to_string()
}
