//! Ledger & aggregation store
//!
//! Owns every piece of domain state: merged player profiles, per-player
//! action logs, recent coin drops, running totals, the notification archive
//! and the tracked-player set. `apply` is the only mutation entry point for
//! classified events; everything else is a read accessor or an explicit
//! maintenance operation (tracking, reset, rehydration).
//!
//! Every mutation marks the persisted keys it touched as dirty so the
//! persistence layer can write through only what changed.

use super::types::{
    ActionLogEntry, BetEvent, CoinDropRecord, EventKind, Notification, NotifyCategory,
    PlayerAction, PlayerProfile, ProfilePatch, TransferDirection, TypedEvent,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const ACTION_LOG_CAP: usize = 200;
pub const RECENT_DROPS_CAP: usize = 20;
pub const ARCHIVE_CAP: usize = 200;

/// Default big-win threshold, in the bet's currency
pub const DEFAULT_BIG_WIN_THRESHOLD: f64 = 1000.0;

/// Default look-back for `top_balances` (2 hours)
pub const TOP_BALANCES_WINDOW_MS: i64 = 2 * 60 * 60 * 1000;
pub const TOP_BALANCES_LIMIT: usize = 20;

/// Logical persistence keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreKey {
    RecentDrops,
    DropTotals,
    NotificationArchive,
    TipTotals,
    TrackedPlayers,
    ActionLog,
    Players,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::RecentDrops => "pastDrops",
            StoreKey::DropTotals => "totalAmounts",
            StoreKey::NotificationArchive => "notificationsArchive",
            StoreKey::TipTotals => "tipTotals",
            StoreKey::TrackedPlayers => "trackedPlayers",
            StoreKey::ActionLog => "actionsMap",
            StoreKey::Players => "players",
        }
    }

    pub fn all() -> [StoreKey; 7] {
        [
            StoreKey::RecentDrops,
            StoreKey::DropTotals,
            StoreKey::NotificationArchive,
            StoreKey::TipTotals,
            StoreKey::TrackedPlayers,
            StoreKey::ActionLog,
            StoreKey::Players,
        ]
    }
}

/// Notification policy applied while events are committed
#[derive(Debug, Clone)]
pub struct LedgerRules {
    pub big_win_threshold: f64,
    /// Events with this message code commit normally but never notify
    pub suppress_code: Option<i64>,
}

impl Default for LedgerRules {
    fn default() -> Self {
        Self {
            big_win_threshold: DEFAULT_BIG_WIN_THRESHOLD,
            suppress_code: Some(3513),
        }
    }
}

#[derive(Debug, Default)]
pub struct Ledger {
    profiles: HashMap<String, PlayerProfile>,
    /// Most-recent-first, capped at `ACTION_LOG_CAP` per player
    action_log: HashMap<String, Vec<ActionLogEntry>>,
    recent_drops: Vec<CoinDropRecord>,
    drop_totals: BTreeMap<String, f64>,
    tip_totals: BTreeMap<String, f64>,
    archive: Vec<Notification>,
    tracked: BTreeSet<String>,
    dirty: BTreeSet<StoreKey>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a screened event; returns the notifications it raised
    pub fn apply(&mut self, event: &TypedEvent, now: i64, rules: &LedgerRules) -> Vec<Notification> {
        let mut raised = Vec::new();

        for patch in &event.presence {
            self.merge_profile(patch, now);
        }
        for change in &event.balances {
            self.set_balance(&change.uid, change.balance, now);
        }

        match &event.kind {
            EventKind::Tip(tip) => {
                *self.tip_totals.entry(tip.currency.clone()).or_insert(0.0) += tip.amount;
                self.dirty.insert(StoreKey::TipTotals);

                if let Some(uid) = &tip.player_id {
                    self.log_action(
                        uid,
                        PlayerAction::Tip {
                            amount: tip.amount,
                            currency: tip.currency.clone(),
                        },
                        now,
                    );
                    if self.is_tracked(uid) {
                        let name = tip.player_name.as_deref().unwrap_or(uid.as_str());
                        raised.push(notice(
                            format!(
                                "Tracked Player {} tipped {} {}",
                                name,
                                tip.amount,
                                tip.currency.to_uppercase()
                            ),
                            NotifyCategory::for_currency(&tip.currency),
                            now,
                        ));
                    }
                }
            }
            EventKind::CoinDrop(drop) => {
                raised.push(notice(
                    format!(
                        "Coin Drop: {} {} for {} people",
                        drop.amount,
                        drop.currency.to_uppercase(),
                        drop.recipient_count
                    ),
                    NotifyCategory::for_currency(&drop.currency),
                    now,
                ));

                self.recent_drops.insert(
                    0,
                    CoinDropRecord {
                        drop_id: drop.drop_id.clone(),
                        amount: drop.amount,
                        currency: drop.currency.clone(),
                        recipient_count: drop.recipient_count,
                        context: drop.context.clone(),
                        timestamp: now,
                    },
                );
                self.recent_drops.truncate(RECENT_DROPS_CAP);
                *self.drop_totals.entry(drop.currency.clone()).or_insert(0.0) += drop.amount;
                self.dirty.insert(StoreKey::RecentDrops);
                self.dirty.insert(StoreKey::DropTotals);
            }
            EventKind::DepositWithdraw(transfer) => {
                if let Some(uid) = transfer.player.uid.clone() {
                    let (action, verb) = match transfer.direction {
                        TransferDirection::Deposit => (
                            PlayerAction::Deposit {
                                amount: transfer.amount,
                                currency: transfer.currency.clone(),
                            },
                            "deposited",
                        ),
                        TransferDirection::Withdraw => (
                            PlayerAction::Withdraw {
                                amount: transfer.amount,
                                currency: transfer.currency.clone(),
                            },
                            "withdrew",
                        ),
                    };
                    self.log_action(&uid, action, now);

                    if self.is_tracked(&uid) {
                        raised.push(notice(
                            format!(
                                "Tracked Player {} {} {} {}",
                                transfer.player.display_name(),
                                verb,
                                transfer.amount,
                                transfer.currency.to_uppercase()
                            ),
                            NotifyCategory::for_currency(&transfer.currency),
                            now,
                        ));
                    }
                }
            }
            EventKind::SingleBet(bet) => self.apply_bet(bet, now, rules, &mut raised),
            EventKind::BatchBet(bets) => {
                for bet in bets {
                    if bet.player.uid.is_some() {
                        self.merge_profile(&bet.player, now);
                    }
                    self.apply_bet(bet, now, rules, &mut raised);
                }
            }
            EventKind::Chat(chat) => {
                self.log_action(
                    &chat.player_id,
                    PlayerAction::Chat {
                        message: chat.message.clone(),
                    },
                    now,
                );
                if self.is_tracked(&chat.player_id) {
                    let name = chat.player_name.as_deref().unwrap_or(chat.player_id.as_str());
                    raised.push(notice(
                        format!("Tracked Player {} says: {}", name, chat.message),
                        NotifyCategory::Misc,
                        now,
                    ));
                }
            }
            EventKind::PresenceOnly => {}
        }

        if rules.suppress_code.is_some() && event.code == rules.suppress_code {
            if !raised.is_empty() {
                log::debug!(
                    "Suppressed {} notification(s) for code {:?}",
                    raised.len(),
                    event.code
                );
            }
            return Vec::new();
        }

        for n in &raised {
            self.archive.insert(0, n.clone());
        }
        if !raised.is_empty() {
            self.archive.truncate(ARCHIVE_CAP);
            self.dirty.insert(StoreKey::NotificationArchive);
        }

        raised
    }

    fn apply_bet(&mut self, bet: &BetEvent, now: i64, rules: &LedgerRules, raised: &mut Vec<Notification>) {
        let category = NotifyCategory::for_currency(&bet.currency);

        if let Some(uid) = bet.player_id() {
            self.log_action(uid, bet.as_action(), now);
        }

        if bet.win >= rules.big_win_threshold {
            raised.push(notice(
                format!(
                    "Big Win: {} won {} {}",
                    bet.player.display_name(),
                    bet.win,
                    bet.currency.to_uppercase()
                ),
                category,
                now,
            ));
            if let (Some(uid), Some(balance)) = (bet.player_id(), bet.player.redeem_usd) {
                self.set_balance(uid, balance, now);
            }
        }

        if bet.player_id().is_some_and(|uid| self.is_tracked(uid)) {
            raised.push(notice(
                format!(
                    "Tracked Player {} bet {} => won {} {}",
                    bet.player.display_name(),
                    bet.amount,
                    bet.win,
                    bet.currency.to_uppercase()
                ),
                category,
                now,
            ));
        }
    }

    // -----------------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------------

    /// Field-wise merge; patches without a uid are ignored
    pub fn merge_profile(&mut self, patch: &ProfilePatch, now: i64) -> bool {
        let Some(uid) = patch.uid.as_deref() else {
            return false;
        };
        self.profiles
            .entry(uid.to_string())
            .or_insert_with(|| PlayerProfile::new(uid))
            .merge(patch, now);
        self.dirty.insert(StoreKey::Players);
        true
    }

    /// Targeted balance refresh
    pub fn set_balance(&mut self, uid: &str, balance: f64, now: i64) {
        let profile = self
            .profiles
            .entry(uid.to_string())
            .or_insert_with(|| PlayerProfile::new(uid));
        profile.redeem_usd = Some(balance);
        profile.last_updated = now;
        self.dirty.insert(StoreKey::Players);
    }

    fn log_action(&mut self, uid: &str, action: PlayerAction, now: i64) {
        let log = self.action_log.entry(uid.to_string()).or_default();
        log.insert(0, ActionLogEntry { action, time: now });
        log.truncate(ACTION_LOG_CAP);
        self.dirty.insert(StoreKey::ActionLog);
    }

    /// Flip tracking for a player; returns whether the player is now tracked
    pub fn toggle_tracked(&mut self, uid: &str) -> bool {
        self.dirty.insert(StoreKey::TrackedPlayers);
        if self.tracked.remove(uid) {
            false
        } else {
            self.tracked.insert(uid.to_string());
            true
        }
    }

    /// Drop every record and mark all keys dirty
    pub fn clear(&mut self) {
        *self = Self::default();
        self.dirty.extend(StoreKey::all());
    }

    pub fn action_log_mut(&mut self) -> &mut HashMap<String, Vec<ActionLogEntry>> {
        self.dirty.insert(StoreKey::ActionLog);
        &mut self.action_log
    }

    pub fn mark_dirty(&mut self, key: StoreKey) {
        self.dirty.insert(key);
    }

    pub fn take_dirty(&mut self) -> Vec<StoreKey> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    // -----------------------------------------------------------------------
    // Read accessors
    // -----------------------------------------------------------------------

    pub fn get_profile(&self, uid: &str) -> Option<&PlayerProfile> {
        self.profiles.get(uid)
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn get_totals(&self) -> &BTreeMap<String, f64> {
        &self.drop_totals
    }

    pub fn get_tip_totals(&self) -> &BTreeMap<String, f64> {
        &self.tip_totals
    }

    pub fn get_recent_drops(&self) -> &[CoinDropRecord] {
        &self.recent_drops
    }

    pub fn get_action_log(&self, uid: &str) -> &[ActionLogEntry] {
        self.action_log.get(uid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last_action(&self, uid: &str) -> Option<&ActionLogEntry> {
        self.action_log.get(uid).and_then(|log| log.first())
    }

    pub fn archive(&self) -> &[Notification] {
        &self.archive
    }

    pub fn is_tracked(&self, uid: &str) -> bool {
        self.tracked.contains(uid)
    }

    pub fn tracked_players(&self) -> impl Iterator<Item = &str> {
        self.tracked.iter().map(String::as_str)
    }

    /// Players with a balance refreshed inside the window, richest first
    pub fn top_balances(&self, now: i64, within_ms: i64, limit: usize) -> Vec<&PlayerProfile> {
        let mut ranked: Vec<&PlayerProfile> = self
            .profiles
            .values()
            .filter(|p| p.redeem_usd.is_some() && now - p.last_updated <= within_ms)
            .collect();

        ranked.sort_by(|a, b| {
            let a = a.redeem_usd.unwrap_or(0.0);
            let b = b.redeem_usd.unwrap_or(0.0);
            b.total_cmp(&a)
        });
        ranked.truncate(limit);
        ranked
    }

    // -----------------------------------------------------------------------
    // Snapshot / restore
    // -----------------------------------------------------------------------

    pub fn snapshot(&self, key: StoreKey) -> Result<Value, serde_json::Error> {
        match key {
            StoreKey::RecentDrops => serde_json::to_value(&self.recent_drops),
            StoreKey::DropTotals => serde_json::to_value(&self.drop_totals),
            StoreKey::NotificationArchive => serde_json::to_value(&self.archive),
            StoreKey::TipTotals => serde_json::to_value(&self.tip_totals),
            StoreKey::TrackedPlayers => serde_json::to_value(&self.tracked),
            StoreKey::ActionLog => serde_json::to_value(&self.action_log),
            StoreKey::Players => serde_json::to_value(&self.profiles),
        }
    }

    /// Replace one collection with a persisted copy; caps are re-applied
    pub fn restore(&mut self, key: StoreKey, value: Value) -> Result<(), serde_json::Error> {
        match key {
            StoreKey::RecentDrops => {
                self.recent_drops = serde_json::from_value(value)?;
                self.recent_drops.truncate(RECENT_DROPS_CAP);
            }
            StoreKey::DropTotals => self.drop_totals = serde_json::from_value(value)?,
            StoreKey::NotificationArchive => {
                self.archive = serde_json::from_value(value)?;
                self.archive.truncate(ARCHIVE_CAP);
            }
            StoreKey::TipTotals => self.tip_totals = serde_json::from_value(value)?,
            StoreKey::TrackedPlayers => self.tracked = serde_json::from_value(value)?,
            StoreKey::ActionLog => {
                self.action_log = serde_json::from_value(value)?;
                for log in self.action_log.values_mut() {
                    log.truncate(ACTION_LOG_CAP);
                }
            }
            StoreKey::Players => self.profiles = serde_json::from_value(value)?,
        }
        Ok(())
    }
}

fn notice(message: String, category: NotifyCategory, timestamp: i64) -> Notification {
    Notification {
        message,
        category,
        timestamp,
    }
}
