//! CosmJS-style offline signers backed by a wallet session.

use crate::controller::SessionController;
use coin98_connect_core::method::CosmosMethod;
use coin98_connect_core::{ConnectError, Method, Param, WalletResponse, describe};
use serde::Serialize;
use serde_json::Value;

/// One account exposed by the wallet for a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountData {
    pub address: String,
    pub algo: String,
    pub pubkey: Vec<u8>,
}

/// Amino-only signer.
#[derive(Clone)]
pub struct OfflineSignerOnlyAmino {
    chain_id: String,
    client: SessionController,
}

impl OfflineSignerOnlyAmino {
    pub fn new(chain_id: impl Into<String>, client: SessionController) -> Self {
        Self {
            chain_id: chain_id.into(),
            client,
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub async fn get_accounts(&self) -> Result<Vec<AccountData>, ConnectError> {
        let response = self.get_key().await?;
        if let Some(err) = response.error.as_ref().filter(|e| !e.is_null()) {
            return Err(ConnectError::ConnectionRejected(describe(err)));
        }
        let key = response
            .result
            .ok_or_else(|| ConnectError::Signer("wallet returned no key".into()))?;
        let address = bech32_address(&key)?;
        let pubkey = key
            .get("pubKey")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectError::Signer("key has no pubKey".into()))?;
        let pubkey = bs58::decode(pubkey)
            .into_vec()
            .map_err(|e| ConnectError::Signer(format!("invalid pubKey: {e}")))?;

        // Only secp256k1 keys are handed out.
        Ok(vec![AccountData {
            address,
            algo: "secp256k1".to_string(),
            pubkey,
        }])
    }

    pub async fn sign_amino(&self, signer: &str, sign_doc: Value) -> Result<Value, ConnectError> {
        self.check_chain(&sign_doc, "chain_id")?;
        self.check_signer(signer).await?;
        self.sign_with(CosmosMethod::SignAmino, signer, sign_doc).await
    }

    /// Pre-stargate name for [`sign_amino`](Self::sign_amino).
    pub async fn sign(&self, signer: &str, sign_doc: Value) -> Result<Value, ConnectError> {
        self.sign_amino(signer, sign_doc).await
    }

    async fn get_key(&self) -> Result<WalletResponse, ConnectError> {
        self.client
            .request(
                Method::Cosmos(CosmosMethod::GetKey),
                vec![Param::from(self.chain_id.as_str())],
            )
            .await
    }

    fn check_chain(&self, sign_doc: &Value, field: &str) -> Result<(), ConnectError> {
        if sign_doc.get(field).and_then(Value::as_str) == Some(self.chain_id.as_str()) {
            Ok(())
        } else {
            Err(ConnectError::Signer("Unmatched chain id with the offline signer".into()))
        }
    }

    async fn check_signer(&self, signer: &str) -> Result<(), ConnectError> {
        let key = self.get_key().await?;
        let address = key.result.as_ref().map(bech32_address).transpose()?;
        if address.as_deref() == Some(signer) {
            Ok(())
        } else {
            Err(ConnectError::Signer("Unknown signer address".into()))
        }
    }

    async fn sign_with(
        &self,
        method: CosmosMethod,
        signer: &str,
        sign_doc: Value,
    ) -> Result<Value, ConnectError> {
        let params = vec![
            Param::from(self.chain_id.as_str()),
            Param::from(signer),
            Param::Json(sign_doc),
        ];
        let response = self.client.request(Method::Cosmos(method), params).await?;
        Ok(signed_or_whole(response))
    }
}

/// Amino and direct signer.
#[derive(Clone)]
pub struct OfflineSigner {
    amino: OfflineSignerOnlyAmino,
}

impl OfflineSigner {
    pub fn new(chain_id: impl Into<String>, client: SessionController) -> Self {
        Self {
            amino: OfflineSignerOnlyAmino::new(chain_id, client),
        }
    }

    pub fn chain_id(&self) -> &str {
        self.amino.chain_id()
    }

    pub async fn get_accounts(&self) -> Result<Vec<AccountData>, ConnectError> {
        self.amino.get_accounts().await
    }

    pub async fn sign_amino(&self, signer: &str, sign_doc: Value) -> Result<Value, ConnectError> {
        self.amino.sign_amino(signer, sign_doc).await
    }

    pub async fn sign(&self, signer: &str, sign_doc: Value) -> Result<Value, ConnectError> {
        self.amino.sign(signer, sign_doc).await
    }

    /// Sign a protobuf `SignDoc`. Byte-array `bodyBytes` and `authInfoBytes`
    /// are base58-encoded on the way out.
    pub async fn sign_direct(&self, signer: &str, sign_doc: Value) -> Result<Value, ConnectError> {
        self.amino.check_chain(&sign_doc, "chainId")?;
        self.amino.check_signer(signer).await?;
        self.amino.sign_with(CosmosMethod::SignDirect, signer, sign_doc).await
    }
}

fn bech32_address(key: &Value) -> Result<String, ConnectError> {
    key.get("bech32Address")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConnectError::Signer("key has no bech32Address".into()))
}

fn signed_or_whole(response: WalletResponse) -> Value {
    match &response.result {
        Some(result) if !result.is_null() && result != &Value::Bool(false) => result.clone(),
        _ => response.into_value(),
    }
}
