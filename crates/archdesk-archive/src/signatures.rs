//! Signature table of wallet and browser-profile indicators
//!
//! Matching is case-insensitive substring containment. Indicators are short
//! and deliberately broad (`"0x"`, `"edge"`), so a hit means "worth a look",
//! not a confirmed wallet.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category a signature hit is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WalletCategory {
    Exodus,
    Atomic,
    MetaMask,
    Bitcoin,
    Ethereum,
    Electrum,
    Coinbase,
    Binance,
    Trust,
    Ledger,
    Brave,
    Chrome,
    Edge,
    Opera,
    Wallets,
}

impl WalletCategory {
    /// Every category, in table order
    pub const ALL: [WalletCategory; 15] = [
        WalletCategory::Exodus,
        WalletCategory::Atomic,
        WalletCategory::MetaMask,
        WalletCategory::Bitcoin,
        WalletCategory::Ethereum,
        WalletCategory::Electrum,
        WalletCategory::Coinbase,
        WalletCategory::Binance,
        WalletCategory::Trust,
        WalletCategory::Ledger,
        WalletCategory::Brave,
        WalletCategory::Chrome,
        WalletCategory::Edge,
        WalletCategory::Opera,
        WalletCategory::Wallets,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WalletCategory::Exodus => "Exodus",
            WalletCategory::Atomic => "Atomic",
            WalletCategory::MetaMask => "MetaMask",
            WalletCategory::Bitcoin => "Bitcoin",
            WalletCategory::Ethereum => "Ethereum",
            WalletCategory::Electrum => "Electrum",
            WalletCategory::Coinbase => "Coinbase",
            WalletCategory::Binance => "Binance",
            WalletCategory::Trust => "Trust",
            WalletCategory::Ledger => "Ledger",
            WalletCategory::Brave => "Brave",
            WalletCategory::Chrome => "Chrome",
            WalletCategory::Edge => "Edge",
            WalletCategory::Opera => "Opera",
            WalletCategory::Wallets => "Wallets",
        }
    }

    /// Indicator strings, stored lowercase
    pub fn indicators(self) -> &'static [&'static str] {
        match self {
            WalletCategory::Exodus => &[
                "exodus.wallet",
                "exodus.conf",
                "exodus-",
                "exodus",
                "exodus21",
                "app-",
            ],
            WalletCategory::Atomic => &[
                "atomic.wallet",
                "atomicwallet",
                "atomic wallet",
                "atomic-",
                "atomicdex",
            ],
            WalletCategory::MetaMask => &[
                "metamask",
                "0x",
                "nkbihfbeogaeaoehlefnkodbefgpgknn",
                "local extension settings",
            ],
            WalletCategory::Bitcoin => &[
                "wallet.dat",
                "bitcoin.conf",
                "bitcoin-qt",
                "bitcoin",
                "bitcoin core",
                "bitcoind",
            ],
            WalletCategory::Ethereum => &["keystore", "ethereum", "geth", "parity"],
            WalletCategory::Electrum => &["electrum.dat", "electrum", "electrum_data"],
            WalletCategory::Coinbase => &["coinbase", "com.coinbase"],
            WalletCategory::Binance => &["binance", "bnb", "app_binance"],
            WalletCategory::Trust => &["trust wallet", "trustwallet", "trust-", "com.wallet.crypto"],
            WalletCategory::Ledger => &["ledger", "ledger live", "ledger-live"],
            WalletCategory::Brave => &["brave", "brave-browser", "bravesoftware"],
            WalletCategory::Chrome => &["chrome", "google\\chrome", "google-chrome"],
            WalletCategory::Edge => &["edge", "microsoft\\edge"],
            WalletCategory::Opera => &["opera", "opera software"],
            WalletCategory::Wallets => &[
                "wallets",
                "wallet_",
                "seed.txt",
                "recovery",
                "mnemonic",
            ],
        }
    }

    /// Whether any indicator occurs in `lowercase_text`
    fn matches_lowercase(self, lowercase_text: &str) -> bool {
        self.indicators()
            .iter()
            .any(|indicator| lowercase_text.contains(indicator))
    }
}

impl fmt::Display for WalletCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Categories with at least one indicator in `text`, in table order
pub fn match_signatures(text: &str) -> Vec<WalletCategory> {
    let lowercase = text.to_lowercase();
    WalletCategory::ALL
        .into_iter()
        .filter(|category| category.matches_lowercase(&lowercase))
        .collect()
}
