//! Financial documents, risk tiers and AI-owned JSON payloads

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::entities::{financial_documents, risk_assessments};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Payslip or bank statement
    #[sea_orm(string_value = "salary_statement")]
    SalaryStatement,
    #[sea_orm(string_value = "utility_bill")]
    UtilityBill,
    #[sea_orm(string_value = "labor_contract")]
    LaborContract,
    #[sea_orm(string_value = "invoice")]
    Invoice,
}

/// Credit tier assigned by the external scorer. A is the best tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(1))")]
pub enum RiskTier {
    #[sea_orm(string_value = "A")]
    A,
    #[sea_orm(string_value = "B")]
    B,
    #[sea_orm(string_value = "C")]
    C,
    #[sea_orm(string_value = "D")]
    D,
}

impl RiskTier {
    /// Ordinal passed to the collateral contract (A = 1 … D = 4)
    pub fn ordinal(self) -> u8 {
        match self {
            RiskTier::A => 1,
            RiskTier::B => 2,
            RiskTier::C => 3,
            RiskTier::D => 4,
        }
    }

    pub fn from_ordinal(ordinal: i16) -> Option<Self> {
        match ordinal {
            1 => Some(RiskTier::A),
            2 => Some(RiskTier::B),
            3 => Some(RiskTier::C),
            4 => Some(RiskTier::D),
            _ => None,
        }
    }

    /// Maximum loan-to-value ratio for the tier
    pub fn max_ltv(self) -> Decimal {
        match self {
            RiskTier::A => dec!(0.80),
            RiskTier::B => dec!(0.60),
            RiskTier::C => dec!(0.40),
            RiskTier::D => Decimal::ZERO,
        }
    }

    pub fn is_lendable(self) -> bool {
        self != RiskTier::D
    }
}

impl Ord for RiskTier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower ordinal is the better tier
        other.ordinal().cmp(&self.ordinal())
    }
}

impl PartialOrd for RiskTier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::A => write!(f, "A"),
            RiskTier::B => write!(f, "B"),
            RiskTier::C => write!(f, "C"),
            RiskTier::D => write!(f, "D"),
        }
    }
}

impl FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" | "1" => Ok(RiskTier::A),
            "B" | "2" => Ok(RiskTier::B),
            "C" | "3" => Ok(RiskTier::C),
            "D" | "4" => Ok(RiskTier::D),
            _ => Err(format!("Unknown risk tier: {}", s)),
        }
    }
}

/// Schema-on-read view over a JSON object whose shape is owned by the AI service.
///
/// Nothing is validated up front; callers ask for the fields they understand
/// and get `None` for anything missing or of an unexpected type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonFields(Map<String, Value>);

impl JsonFields {
    /// Accepts an object, or a string holding a serialized object.
    /// Anything else reads as empty.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self(map.clone()),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Self(map),
                _ => Self::default(),
            },
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Numbers and numeric strings ("1.5e6" is not accepted)
    pub fn decimal(&self, key: &str) -> Option<Decimal> {
        match self.0.get(key)? {
            Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            Value::String(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Document as listed on `GET /documents`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: i32,
    pub document_type: DocumentType,
    pub file_url: String,
    pub document_hash: String,
    pub verified_income_amount: Decimal,
    pub currency: String,
    pub extracted_data: JsonFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_tier: Option<RiskTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_reasoning: Option<JsonFields>,
    pub uploaded_at: String,
}

impl DocumentResponse {
    pub fn new(
        document: financial_documents::Model,
        assessment: Option<risk_assessments::Model>,
    ) -> Self {
        Self {
            id: document.id,
            document_type: document.document_type,
            file_url: document.file_url,
            document_hash: document.document_hash,
            verified_income_amount: document.verified_income_amount,
            currency: document.currency,
            extracted_data: JsonFields::from_json(&document.extracted_data),
            risk_tier: assessment.as_ref().map(|a| a.tier),
            risk_score: assessment.as_ref().map(|a| a.score),
            ai_reasoning: assessment.as_ref().map(|a| JsonFields::from_json(&a.ai_reasoning)),
            uploaded_at: document.uploaded_at.to_rfc3339(),
        }
    }
}
