//! Core data structures: typed events, profiles, ledger records

use super::de;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Currency used when an event omits one
pub const DEFAULT_CURRENCY: &str = "usd";

/// Lower-cased currency tag, defaulting to `usd`
pub fn normalize_currency(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_lowercase(),
        _ => DEFAULT_CURRENCY.to_string(),
    }
}

/// Notification Sink category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyCategory {
    /// Default category (non-currency notices, unknown currencies)
    Misc,
    Usd,
    Gold,
}

impl NotifyCategory {
    pub fn for_currency(currency: &str) -> Self {
        match currency {
            "usd" => NotifyCategory::Usd,
            "gold" => NotifyCategory::Gold,
            _ => NotifyCategory::Misc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyCategory::Misc => "misc",
            NotifyCategory::Usd => "usd",
            NotifyCategory::Gold => "gold",
        }
    }
}

/// Partial player record as carried by a platform `user` object
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, deserialize_with = "de::lenient_id")]
    pub uid: Option<String>,
    #[serde(default, deserialize_with = "de::lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de::lenient_i64")]
    pub level: Option<i64>,
    #[serde(default, alias = "vip_level", deserialize_with = "de::lenient_i64")]
    pub vip: Option<i64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    pub redeem_usd: Option<f64>,
    /// Any other fields the platform sends along
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfilePatch {
    pub fn for_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            ..Self::default()
        }
    }

    /// Display name, falling back to the uid
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.uid.as_deref())
            .unwrap_or("unknown")
    }
}

/// Merged player record, keyed by `uid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vip: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeem_usd: Option<f64>,
    #[serde(default)]
    pub last_updated: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlayerProfile {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: None,
            level: None,
            vip: None,
            redeem_usd: None,
            last_updated: 0,
            extra: Map::new(),
        }
    }

    /// Last-write-wins merge of the patch's non-null fields
    pub fn merge(&mut self, patch: &ProfilePatch, now: i64) {
        if let Some(name) = &patch.name {
            self.name = Some(name.clone());
        }
        if let Some(level) = patch.level {
            self.level = Some(level);
        }
        if let Some(vip) = patch.vip {
            self.vip = Some(vip);
        }
        if let Some(balance) = patch.redeem_usd {
            self.redeem_usd = Some(balance);
        }
        for (key, value) in &patch.extra {
            if !value.is_null() {
                self.extra.insert(key.clone(), value.clone());
            }
        }
        self.last_updated = now;
    }
}

/// Player action, kind-tagged (`{"type":"bet",...}` on disk)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerAction {
    Chat { message: String },
    Bet { amount: f64, win: f64, currency: String },
    Deposit { amount: f64, currency: String },
    Withdraw { amount: f64, currency: String },
    Tip { amount: f64, currency: String },
}

impl PlayerAction {
    /// Deterministic serialization of the content fields
    pub fn signature(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlayerAction::Chat { .. } => "chat",
            PlayerAction::Bet { .. } => "bet",
            PlayerAction::Deposit { .. } => "deposit",
            PlayerAction::Withdraw { .. } => "withdraw",
            PlayerAction::Tip { .. } => "tip",
        }
    }
}

/// One logged action with its arrival time (Unix ms)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    #[serde(flatten)]
    pub action: PlayerAction,
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinDropRecord {
    pub drop_id: String,
    pub amount: f64,
    pub currency: String,
    pub recipient_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub timestamp: i64,
}

/// Archived notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub category: NotifyCategory,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Typed events (classifier output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TipEvent {
    pub player_id: Option<String>,
    pub player_name: Option<String>,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoinDropEvent {
    pub drop_id: String,
    pub amount: f64,
    pub currency: String,
    pub recipient_count: i64,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Deposit,
    Withdraw,
}

impl TransferDirection {
    /// Platform discriminant: `1` = deposit, `2` = withdraw
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(TransferDirection::Deposit),
            2 => Some(TransferDirection::Withdraw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub player: ProfilePatch,
    pub direction: TransferDirection,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BetEvent {
    pub player: ProfilePatch,
    pub amount: f64,
    pub win: f64,
    pub currency: String,
    pub record_id: Option<String>,
}

impl BetEvent {
    pub fn player_id(&self) -> Option<&str> {
        self.player.uid.as_deref()
    }

    /// `(playerId, amount, win, currency)` key for the sliding-window guard
    pub fn window_signature(&self) -> String {
        serde_json::json!([self.player_id(), self.amount, self.win, self.currency]).to_string()
    }

    pub fn as_action(&self) -> PlayerAction {
        PlayerAction::Bet {
            amount: self.amount,
            win: self.win,
            currency: self.currency.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub player_id: String,
    pub player_name: Option<String>,
    pub message: String,
}

/// Targeted balance refresh for one player
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    pub uid: String,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Tip(TipEvent),
    CoinDrop(CoinDropEvent),
    DepositWithdraw(TransferEvent),
    SingleBet(BetEvent),
    BatchBet(Vec<BetEvent>),
    Chat(ChatEvent),
    /// Only player fields changed
    PresenceOnly,
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Tip(_) => "tip",
            EventKind::CoinDrop(_) => "coinDrop",
            EventKind::DepositWithdraw(_) => "depositWithdraw",
            EventKind::SingleBet(_) => "singleBet",
            EventKind::BatchBet(_) => "batchBet",
            EventKind::Chat(_) => "chat",
            EventKind::PresenceOnly => "presenceOnly",
        }
    }
}

/// Classified event ready for dedup and ledger application
#[derive(Debug, Clone, PartialEq)]
pub struct TypedEvent {
    pub code: Option<i64>,
    /// Profile merges carried alongside the primary kind
    pub presence: Vec<ProfilePatch>,
    pub balances: Vec<BalanceChange>,
    pub kind: EventKind,
}

impl TypedEvent {
    pub fn new(code: Option<i64>, kind: EventKind) -> Self {
        Self {
            code,
            presence: Vec::new(),
            balances: Vec::new(),
            kind,
        }
    }
}
