use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkWalletRequest {
    pub address: String,
    /// 65-byte personal_sign signature, hex encoded
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkWalletResponse {
    pub address: String,
}
