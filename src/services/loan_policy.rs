//! Loan pricing and the conversions between platform and on-chain values

use alloy::primitives::{B256, U256};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::chain::GasPolicy;
use crate::entities::{financial_documents, risk_assessments};
use crate::error::ValidationError;
use crate::models::document::RiskTier;

#[derive(Debug, Clone)]
pub struct LoanPolicy {
    /// Flat interest over the whole term
    pub interest_rate: Decimal,
    /// Deducted from the principal at disbursement
    pub origination_fee_rate: Decimal,
    pub term_days: i64,
    /// Decimals of the ERC-20 used as loan currency
    pub currency_decimals: u32,
    /// Tier assumed for documents without a risk assessment
    pub default_risk_tier: RiskTier,
    pub default_trust_score: i32,
    /// How long an unfinished activation keeps other activations out
    pub activation_lease_secs: i64,
    pub gas: GasPolicy,
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            interest_rate: dec!(0.05),
            origination_fee_rate: dec!(0.01),
            term_days: 30,
            currency_decimals: 18,
            default_risk_tier: RiskTier::A,
            default_trust_score: 85,
            activation_lease_secs: 900,
            gas: GasPolicy::default(),
        }
    }
}

/// Terms frozen into an origination attempt
#[derive(Debug, Clone, PartialEq)]
pub struct LoanTerms {
    pub principal: Decimal,
    pub interest: Decimal,
    pub due_date: DateTime<Utc>,
    pub risk_tier: RiskTier,
    pub trust_score: i32,
}

impl LoanTerms {
    pub fn total_repayment(&self) -> Decimal {
        self.principal + self.interest
    }
}

impl LoanPolicy {
    pub fn quote(
        &self,
        document: &financial_documents::Model,
        assessment: Option<&risk_assessments::Model>,
        now: DateTime<Utc>,
    ) -> Result<LoanTerms, ValidationError> {
        let principal = document.verified_income_amount;
        if principal <= Decimal::ZERO {
            return Err(ValidationError::NoVerifiedIncome(document.id));
        }

        let risk_tier = assessment.map(|a| a.tier).unwrap_or(self.default_risk_tier);
        if !risk_tier.is_lendable() {
            return Err(ValidationError::IneligibleTier(risk_tier));
        }

        let trust_score = assessment
            .map(|a| a.score.round().clamp(0.0, 100.0) as i32)
            .unwrap_or(self.default_trust_score);

        Ok(LoanTerms {
            principal,
            interest: self.interest_for(principal),
            due_date: now + Duration::days(self.term_days),
            risk_tier,
            trust_score,
        })
    }

    pub fn interest_for(&self, principal: Decimal) -> Decimal {
        (principal * self.interest_rate).round_dp(8)
    }

    /// Amount sent to the borrower after the origination fee
    pub fn net_disbursement(&self, principal: Decimal) -> Decimal {
        principal * (Decimal::ONE - self.origination_fee_rate)
    }

    /// Scales a token amount to the currency's smallest unit, truncating dust
    pub fn to_base_units(&self, amount: Decimal) -> Result<U256, ValidationError> {
        if amount.is_sign_negative() {
            return Err(ValidationError::AmountOutOfRange(amount));
        }
        let scale = Decimal::from_i128_with_scale(10i128.pow(self.currency_decimals), 0);
        let scaled = amount
            .checked_mul(scale)
            .ok_or(ValidationError::AmountOutOfRange(amount))?
            .trunc();
        let units = scaled
            .to_u128()
            .ok_or(ValidationError::AmountOutOfRange(amount))?;
        Ok(U256::from(units))
    }
}

/// Parses a 32-byte hex value, with or without the 0x prefix
pub fn bytes32_from_hex(value: &str) -> Option<B256> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.len() != 64 {
        return None;
    }
    let bytes = hex::decode(digits).ok()?;
    Some(B256::from_slice(&bytes))
}

/// Fixed-width proof token for an off-chain payment reference.
///
/// A 0x-prefixed hex reference is read as hex digits; anything else as its
/// UTF-8 bytes. The result is right-padded with zeros or truncated to 32 bytes.
pub fn proof_token(reference: &str) -> B256 {
    let bytes = match reference.strip_prefix("0x") {
        Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()) => {
            let mut digits: String = digits.chars().take(64).collect();
            if digits.len() % 2 == 1 {
                digits.push('0');
            }
            hex::decode(&digits).unwrap_or_default()
        }
        _ => reference.as_bytes().to_vec(),
    };

    let mut token = [0u8; 32];
    let len = bytes.len().min(32);
    token[..len].copy_from_slice(&bytes[..len]);
    B256::from(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::DocumentType;

    fn document(income: Decimal) -> financial_documents::Model {
        financial_documents::Model {
            id: 1,
            user_id: 1,
            document_type: DocumentType::SalaryStatement,
            file_url: "https://files.invalid/1".to_string(),
            document_hash: format!("0x{}", "11".repeat(32)),
            extracted_data: serde_json::json!({}),
            verified_income_amount: income,
            currency: "VND".to_string(),
            uploaded_at: Utc::now().into(),
        }
    }

    fn assessment(tier: RiskTier, score: f64) -> risk_assessments::Model {
        risk_assessments::Model {
            id: 1,
            document_id: 1,
            tier,
            score,
            approved_ltv: 0.8,
            interest_rate: 0.05,
            ai_reasoning: serde_json::json!({}),
            assessed_at: Utc::now().into(),
        }
    }

    #[test]
    fn test_quote_for_unassessed_document() {
        let policy = LoanPolicy::default();
        let now = Utc::now();
        let terms = policy.quote(&document(dec!(100)), None, now).unwrap();

        assert_eq!(terms.principal, dec!(100));
        assert_eq!(terms.interest, dec!(5));
        assert_eq!(terms.total_repayment(), dec!(105));
        assert_eq!(terms.due_date, now + Duration::days(30));
        assert_eq!(terms.risk_tier, RiskTier::A);
        assert_eq!(terms.trust_score, 85);
    }

    #[test]
    fn test_quote_uses_assessment() {
        let policy = LoanPolicy::default();
        let terms = policy
            .quote(&document(dec!(2000)), Some(&assessment(RiskTier::C, 61.6)), Utc::now())
            .unwrap();
        assert_eq!(terms.risk_tier, RiskTier::C);
        assert_eq!(terms.trust_score, 62);
    }

    #[test]
    fn test_quote_rejects_ineligible_documents() {
        let policy = LoanPolicy::default();
        assert!(matches!(
            policy.quote(&document(Decimal::ZERO), None, Utc::now()),
            Err(ValidationError::NoVerifiedIncome(1))
        ));
        assert!(matches!(
            policy.quote(&document(dec!(100)), Some(&assessment(RiskTier::D, 10.0)), Utc::now()),
            Err(ValidationError::IneligibleTier(RiskTier::D))
        ));
    }

    #[test]
    fn test_net_disbursement_and_base_units() {
        let policy = LoanPolicy::default();
        let net = policy.net_disbursement(dec!(100));
        assert_eq!(net, dec!(99));
        assert_eq!(
            policy.to_base_units(net).unwrap(),
            U256::from(99u128 * 10u128.pow(18))
        );

        let six = LoanPolicy {
            currency_decimals: 6,
            ..LoanPolicy::default()
        };
        assert_eq!(six.to_base_units(dec!(1.2345678)).unwrap(), U256::from(1_234_567u64));
        assert!(policy.to_base_units(dec!(-1)).is_err());
    }

    #[test]
    fn test_bytes32_from_hex() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(bytes32_from_hex(&hash), Some(B256::repeat_byte(0xab)));
        assert_eq!(bytes32_from_hex(&"ab".repeat(32)), Some(B256::repeat_byte(0xab)));
        assert_eq!(bytes32_from_hex("0xabcd"), None);
        assert_eq!(bytes32_from_hex(&"zz".repeat(32)), None);
    }

    #[test]
    fn test_proof_token_pads_short_text() {
        let token = proof_token("BANK-REF-1");
        assert_eq!(&token[..10], b"BANK-REF-1");
        assert!(token[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_proof_token_boundaries() {
        let exact = "a".repeat(32);
        assert_eq!(proof_token(&exact).as_slice(), exact.as_bytes());

        let long = format!("{}tail", "b".repeat(32));
        assert_eq!(proof_token(&long).as_slice(), "b".repeat(32).as_bytes());

        assert_eq!(proof_token(""), B256::ZERO);
    }

    #[test]
    fn test_proof_token_reads_hex_references() {
        let token = proof_token("0xdeadbeef");
        assert_eq!(&token[..4], &[0xde, 0xad, 0xbe, 0xef]);
        assert!(token[4..].iter().all(|b| *b == 0));

        // Odd digit count is completed with a trailing zero nibble
        let odd = proof_token("0xabc");
        assert_eq!(&odd[..2], &[0xab, 0xc0]);

        let full = format!("0x{}", "cd".repeat(40));
        assert_eq!(proof_token(&full), B256::repeat_byte(0xcd));

        // Not valid hex, so read as text
        let text = proof_token("0xnot-hex");
        assert_eq!(&text[..9], b"0xnot-hex");
    }
}
