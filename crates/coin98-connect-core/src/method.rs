//! The closed set of wallet methods, grouped by chain family.
//!
//! Methods travel as their wire names (`eth_sign`, `sol_signMessage`, ...).
//! Parsing an unknown name fails with [`ConnectError::UnknownMethod`].

use crate::ConnectError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! method_family {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire name of the method.
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            fn from_wire(name: &str) -> Option<Self> {
                match name {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

method_family! {
    /// EVM account and signing methods.
    EvmMethod {
        GetEncryptionPublicKey => "eth_getEncryptionPublicKey",
        Sign => "eth_sign",
        PersonalSign => "personal_sign",
        PersonalEcRecover => "personal_ecRecover",
        SignTransaction => "sign_transaction",
        SendTransaction => "eth_sendTransaction",
        SendTransactionLegacy => "send_transaction",
        SignTypedData => "eth_signTypedData",
        SignTypedDataV3 => "eth_signTypedData_v3",
        SignTypedDataV4 => "eth_signTypedData_v4",
        Accounts => "eth_accounts",
        RequestAccounts => "eth_requestAccounts",
    }
}

method_family! {
    /// Solana methods. `Sign`, `SignAllTransactions` and `SignMessage` have
    /// their params rewritten by the codec.
    SolanaMethod {
        Accounts => "sol_accounts",
        RequestAccounts => "sol_requestAccounts",
        Sign => "sol_sign",
        SignAllTransactions => "sol_signAllTransactions",
        SignMessage => "sol_signMessage",
        Verify => "sol_verify",
        Transfer => "transfer",
    }
}

method_family! {
    NearMethod {
        Account => "near_account",
        AccountBalance => "near_accountBalance",
        AccountState => "near_accountState",
        View => "near_view",
        SignAndSendTransaction => "near_signAndSendTransaction",
    }
}

method_family! {
    /// Terra methods. Terra's `connect` is the shared [`Method::Connect`].
    TerraMethod {
        Sign => "sign",
        Post => "post",
    }
}

method_family! {
    /// Cosmos methods. `SignDirect` has its sign document byte fields
    /// rewritten by the codec.
    CosmosMethod {
        GetKey => "cosmos_getKey",
        Sign => "cosmos_sign",
        SignAmino => "cosmos_signAmino",
        SignDirect => "cosmos_signDirect",
        SendTx => "cosmos_sendTx",
        ExperimentalSuggestChain => "cosmos_experimentalSuggestChain",
    }
}

/// A wallet method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    /// Session handshake request. The only method allowed before a session
    /// is connected.
    Connect,
    Evm(EvmMethod),
    Solana(SolanaMethod),
    Near(NearMethod),
    Terra(TerraMethod),
    Cosmos(CosmosMethod),
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Connect => "connect",
            Method::Evm(m) => m.as_str(),
            Method::Solana(m) => m.as_str(),
            Method::Near(m) => m.as_str(),
            Method::Terra(m) => m.as_str(),
            Method::Cosmos(m) => m.as_str(),
        }
    }

    pub fn is_connect(self) -> bool {
        self == Method::Connect
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ConnectError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name == "connect" {
            return Ok(Method::Connect);
        }
        EvmMethod::from_wire(name)
            .map(Method::Evm)
            .or_else(|| SolanaMethod::from_wire(name).map(Method::Solana))
            .or_else(|| NearMethod::from_wire(name).map(Method::Near))
            .or_else(|| TerraMethod::from_wire(name).map(Method::Terra))
            .or_else(|| CosmosMethod::from_wire(name).map(Method::Cosmos))
            .ok_or_else(|| ConnectError::UnknownMethod(name.to_string()))
    }
}

impl TryFrom<String> for Method {
    type Error = ConnectError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

impl From<EvmMethod> for Method {
    fn from(m: EvmMethod) -> Self {
        Method::Evm(m)
    }
}

impl From<SolanaMethod> for Method {
    fn from(m: SolanaMethod) -> Self {
        Method::Solana(m)
    }
}

impl From<NearMethod> for Method {
    fn from(m: NearMethod) -> Self {
        Method::Near(m)
    }
}

impl From<TerraMethod> for Method {
    fn from(m: TerraMethod) -> Self {
        Method::Terra(m)
    }
}

impl From<CosmosMethod> for Method {
    fn from(m: CosmosMethod) -> Self {
        Method::Cosmos(m)
    }
}
