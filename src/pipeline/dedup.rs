//! Deduplication guards
//!
//! Three independent guards screen every classified event before it reaches
//! the ledger:
//!
//! - **Debounce**: a per-player action whose signature matches that
//!   player's previous logged action, arriving under `debounce_ms` later
//! - **Bet window**: `(player, amount, win, currency)` seen within
//!   `bet_window_ms`; the guard refreshes the timestamp whenever the bet
//!   passes it, even if a later guard rejects the bet
//! - **Permanent ids**: bet `record_id`s and coin-drop ids, remembered for
//!   the life of the engine
//!
//! A rejected event keeps its profile merges; only its primary effect is
//! dropped (it degrades to presence-only).
//!
//! Guard maps are never evicted.

use super::ledger::Ledger;
use super::types::{ActionLogEntry, BetEvent, EventKind, PlayerAction, TransferDirection, TypedEvent};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_DEBOUNCE_MS: i64 = 1_000;
pub const DEFAULT_BET_WINDOW_MS: i64 = 30_000;

#[derive(Debug, Clone)]
pub struct DedupRules {
    pub debounce_ms: i64,
    pub bet_window_ms: i64,
}

impl Default for DedupRules {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            bet_window_ms: DEFAULT_BET_WINDOW_MS,
        }
    }
}

/// Which guard rejected an event (or one bet of a batch)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    Debounced,
    BetWindow,
    RecordId,
    DropId,
}

/// Event after screening plus the guards that fired
#[derive(Debug, Clone)]
pub struct Screened {
    pub event: TypedEvent,
    pub dropped: Vec<DuplicateReason>,
}

impl Screened {
    pub fn is_duplicate(&self) -> bool {
        !self.dropped.is_empty() && self.event.kind == EventKind::PresenceOnly
    }
}

#[derive(Debug, Default)]
pub struct DedupEngine {
    rules: DedupRules,
    /// Bet window signature → last accepted time
    bet_windows: HashMap<String, i64>,
    record_ids: HashSet<String>,
    drop_ids: HashSet<String>,
}

impl DedupEngine {
    pub fn new(rules: DedupRules) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    pub fn rules(&self) -> &DedupRules {
        &self.rules
    }

    /// Run every applicable guard; `ledger` supplies each player's last action
    pub fn screen(&mut self, mut event: TypedEvent, ledger: &Ledger, now: i64) -> Screened {
        let mut dropped = Vec::new();
        let kind = std::mem::replace(&mut event.kind, EventKind::PresenceOnly);

        event.kind = match kind {
            EventKind::CoinDrop(drop) => {
                if self.drop_ids.insert(drop.drop_id.clone()) {
                    EventKind::CoinDrop(drop)
                } else {
                    dropped.push(DuplicateReason::DropId);
                    EventKind::PresenceOnly
                }
            }
            EventKind::SingleBet(bet) => match self.check_bet(&bet, ledger, now) {
                Ok(()) => EventKind::SingleBet(bet),
                Err(reason) => {
                    dropped.push(reason);
                    EventKind::PresenceOnly
                }
            },
            EventKind::BatchBet(bets) => {
                let mut accepted = Vec::with_capacity(bets.len());
                for bet in bets {
                    match self.check_bet(&bet, ledger, now) {
                        Ok(()) => accepted.push(bet),
                        Err(reason) => dropped.push(reason),
                    }
                }
                if accepted.is_empty() {
                    EventKind::PresenceOnly
                } else {
                    EventKind::BatchBet(accepted)
                }
            }
            EventKind::Tip(tip) => {
                let action = PlayerAction::Tip {
                    amount: tip.amount,
                    currency: tip.currency.clone(),
                };
                if tip
                    .player_id
                    .as_deref()
                    .is_some_and(|uid| self.is_debounced(ledger, uid, &action, now))
                {
                    dropped.push(DuplicateReason::Debounced);
                    EventKind::PresenceOnly
                } else {
                    EventKind::Tip(tip)
                }
            }
            EventKind::DepositWithdraw(transfer) => {
                let action = match transfer.direction {
                    TransferDirection::Deposit => PlayerAction::Deposit {
                        amount: transfer.amount,
                        currency: transfer.currency.clone(),
                    },
                    TransferDirection::Withdraw => PlayerAction::Withdraw {
                        amount: transfer.amount,
                        currency: transfer.currency.clone(),
                    },
                };
                if transfer
                    .player
                    .uid
                    .as_deref()
                    .is_some_and(|uid| self.is_debounced(ledger, uid, &action, now))
                {
                    dropped.push(DuplicateReason::Debounced);
                    EventKind::PresenceOnly
                } else {
                    EventKind::DepositWithdraw(transfer)
                }
            }
            EventKind::Chat(chat) => {
                let action = PlayerAction::Chat {
                    message: chat.message.clone(),
                };
                if self.is_debounced(ledger, &chat.player_id, &action, now) {
                    dropped.push(DuplicateReason::Debounced);
                    EventKind::PresenceOnly
                } else {
                    EventKind::Chat(chat)
                }
            }
            EventKind::PresenceOnly => EventKind::PresenceOnly,
        };

        Screened { event, dropped }
    }

    /// Window guard, then record id, then debounce
    fn check_bet(&mut self, bet: &BetEvent, ledger: &Ledger, now: i64) -> Result<(), DuplicateReason> {
        let signature = bet.window_signature();
        if let Some(&last) = self.bet_windows.get(&signature) {
            if now - last < self.rules.bet_window_ms {
                return Err(DuplicateReason::BetWindow);
            }
        }
        self.bet_windows.insert(signature, now);

        if let Some(id) = &bet.record_id {
            if !self.record_ids.insert(id.clone()) {
                return Err(DuplicateReason::RecordId);
            }
        }

        if let Some(uid) = bet.player_id() {
            if self.is_debounced(ledger, uid, &bet.as_action(), now) {
                return Err(DuplicateReason::Debounced);
            }
        }
        Ok(())
    }

    fn is_debounced(&self, ledger: &Ledger, uid: &str, action: &PlayerAction, now: i64) -> bool {
        ledger.last_action(uid).is_some_and(|last| {
            now - last.time < self.rules.debounce_ms && last.action.signature() == action.signature()
        })
    }

    pub fn seen_drop(&self, drop_id: &str) -> bool {
        self.drop_ids.contains(drop_id)
    }

    pub fn seen_record(&self, record_id: &str) -> bool {
        self.record_ids.contains(record_id)
    }

    /// (bet windows, record ids, drop ids)
    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.bet_windows.len(), self.record_ids.len(), self.drop_ids.len())
    }

    pub fn clear(&mut self) {
        self.bet_windows.clear();
        self.record_ids.clear();
        self.drop_ids.clear();
    }
}

/// Retroactive pass over a rehydrated action log
///
/// Walks each player's log oldest-first and removes any bet that lands
/// within `window_ms` of the last *kept* bet with the same
/// `(amount, win, currency)`. Returns the number of entries removed.
pub fn cleanup_action_log(log: &mut HashMap<String, Vec<ActionLogEntry>>, window_ms: i64) -> usize {
    let mut removed = 0;

    for entries in log.values_mut() {
        let mut last_kept: HashMap<String, i64> = HashMap::new();
        let mut kept = Vec::with_capacity(entries.len());

        for entry in entries.drain(..).rev() {
            if matches!(entry.action, PlayerAction::Bet { .. }) {
                let signature = entry.action.signature();
                if let Some(&prev) = last_kept.get(&signature) {
                    if entry.time - prev < window_ms {
                        removed += 1;
                        continue;
                    }
                }
                last_kept.insert(signature, entry.time);
            }
            kept.push(entry);
        }

        kept.reverse();
        *entries = kept;
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ledger::LedgerRules;
    use crate::pipeline::types::{ChatEvent, CoinDropEvent, ProfilePatch};

    fn bet(uid: &str, amount: f64, win: f64, record_id: Option<&str>) -> BetEvent {
        BetEvent {
            player: ProfilePatch::for_uid(uid),
            amount,
            win,
            currency: "usd".into(),
            record_id: record_id.map(str::to_string),
        }
    }

    fn single(b: BetEvent) -> TypedEvent {
        TypedEvent::new(Some(3547), EventKind::SingleBet(b))
    }

    fn drop_event(id: &str) -> TypedEvent {
        TypedEvent::new(
            None,
            EventKind::CoinDrop(CoinDropEvent {
                drop_id: id.into(),
                amount: 5.0,
                currency: "usd".into(),
                recipient_count: 3,
                context: None,
            }),
        )
    }

    /// Screen then commit, the way the engine does
    fn run(dedup: &mut DedupEngine, ledger: &mut Ledger, event: TypedEvent, now: i64) -> Screened {
        let screened = dedup.screen(event, ledger, now);
        ledger.apply(&screened.event, now, &LedgerRules::default());
        screened
    }

    #[test]
    fn test_bet_window() {
        let mut dedup = DedupEngine::default();
        let mut ledger = Ledger::new();

        assert!(!run(&mut dedup, &mut ledger, single(bet("1", 2.0, 0.0, None)), 0).is_duplicate());
        let second = run(&mut dedup, &mut ledger, single(bet("1", 2.0, 0.0, None)), 5_000);
        assert_eq!(second.dropped, vec![DuplicateReason::BetWindow]);

        // Rejection did not refresh the window, so 31s after the first is accepted
        assert!(!run(&mut dedup, &mut ledger, single(bet("1", 2.0, 0.0, None)), 31_000).is_duplicate());
        assert_eq!(ledger.get_action_log("1").len(), 2);

        // Different player, same amounts
        assert!(!run(&mut dedup, &mut ledger, single(bet("2", 2.0, 0.0, None)), 31_000).is_duplicate());
    }

    #[test]
    fn test_record_id_is_permanent() {
        let mut dedup = DedupEngine::default();
        let ledger = Ledger::new();

        assert!(!dedup.screen(single(bet("1", 1.0, 0.0, Some("r1"))), &ledger, 0).is_duplicate());
        let later = dedup.screen(single(bet("1", 9.0, 0.0, Some("r1"))), &ledger, 10_000_000);
        assert_eq!(later.dropped, vec![DuplicateReason::RecordId]);
        assert!(dedup.seen_record("r1"));
    }

    #[test]
    fn test_drop_id_is_permanent() {
        let mut dedup = DedupEngine::default();
        let ledger = Ledger::new();

        assert!(!dedup.screen(drop_event("77"), &ledger, 0).is_duplicate());
        let again = dedup.screen(drop_event("77"), &ledger, i64::MAX / 2);
        assert!(again.is_duplicate());
        assert_eq!(again.dropped, vec![DuplicateReason::DropId]);
    }

    #[test]
    fn test_chat_debounce() {
        let mut dedup = DedupEngine::default();
        let mut ledger = Ledger::new();
        let chat = || {
            TypedEvent::new(
                None,
                EventKind::Chat(ChatEvent {
                    player_id: "4".into(),
                    player_name: None,
                    message: "gg".into(),
                }),
            )
        };

        assert!(!run(&mut dedup, &mut ledger, chat(), 1_000).is_duplicate());
        assert!(run(&mut dedup, &mut ledger, chat(), 1_500).is_duplicate());
        assert!(!run(&mut dedup, &mut ledger, chat(), 2_000).is_duplicate());
        assert_eq!(ledger.get_action_log("4").len(), 2);
    }

    #[test]
    fn test_rejected_event_keeps_presence() {
        let mut dedup = DedupEngine::default();
        let ledger = Ledger::new();
        dedup.screen(drop_event("1"), &ledger, 0);

        let mut event = drop_event("1");
        event.presence.push(ProfilePatch::for_uid("p"));
        let screened = dedup.screen(event, &ledger, 1);
        assert_eq!(screened.event.kind, EventKind::PresenceOnly);
        assert_eq!(screened.event.presence.len(), 1);
    }

    #[test]
    fn test_batch_keeps_accepted_bets() {
        let mut dedup = DedupEngine::default();
        let ledger = Ledger::new();
        let batch = TypedEvent::new(
            None,
            EventKind::BatchBet(vec![
                bet("1", 1.0, 0.0, Some("a")),
                bet("1", 1.0, 0.0, Some("b")),
                bet("2", 1.0, 0.0, Some("a")),
            ]),
        );

        let screened = dedup.screen(batch, &ledger, 0);
        match &screened.event.kind {
            EventKind::BatchBet(bets) => assert_eq!(bets.len(), 1),
            other => panic!("expected batch, got {:?}", other),
        }
        assert_eq!(
            screened.dropped,
            vec![DuplicateReason::BetWindow, DuplicateReason::RecordId]
        );
        assert!(!screened.is_duplicate());
    }

    #[test]
    fn test_window_refreshed_when_later_guard_rejects() {
        let mut dedup = DedupEngine::default();
        let ledger = Ledger::new();

        assert!(!dedup.screen(single(bet("1", 1.0, 0.0, Some("a"))), &ledger, 0).is_duplicate());
        let reused = dedup.screen(single(bet("2", 1.0, 0.0, Some("a"))), &ledger, 1_000);
        assert_eq!(reused.dropped, vec![DuplicateReason::RecordId]);

        // Player 2's window started with the rejected bet
        let fresh_id = dedup.screen(single(bet("2", 1.0, 0.0, Some("c"))), &ledger, 2_000);
        assert_eq!(fresh_id.dropped, vec![DuplicateReason::BetWindow]);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut dedup = DedupEngine::default();
        let ledger = Ledger::new();
        dedup.screen(drop_event("1"), &ledger, 0);
        dedup.screen(single(bet("1", 1.0, 0.0, Some("r"))), &ledger, 0);
        assert_eq!(dedup.sizes(), (1, 1, 1));

        dedup.clear();
        assert_eq!(dedup.sizes(), (0, 0, 0));
        assert!(!dedup.seen_drop("1"));
    }

    #[test]
    fn test_cleanup_action_log() {
        let bet_entry = |amount: f64, time: i64| ActionLogEntry {
            action: PlayerAction::Bet { amount, win: 0.0, currency: "usd".into() },
            time,
        };
        let chat_entry = |time: i64| ActionLogEntry {
            action: PlayerAction::Chat { message: "hi".into() },
            time,
        };

        let mut log = HashMap::new();
        // Most-recent-first, as stored
        log.insert(
            "1".to_string(),
            vec![
                bet_entry(1.0, 70_000),
                bet_entry(1.0, 50_000),
                chat_entry(45_000),
                chat_entry(44_000),
                bet_entry(2.0, 20_000),
                bet_entry(1.0, 20_000),
                bet_entry(1.0, 10_000),
            ],
        );

        let removed = cleanup_action_log(&mut log, 30_000);
        assert_eq!(removed, 2);

        let times: Vec<i64> = log["1"].iter().map(|e| e.time).collect();
        // 20_000 (1.0) dropped against 10_000; 50_000 kept (40s after 10_000);
        // 70_000 dropped against 50_000. Chats untouched.
        assert_eq!(times, vec![50_000, 45_000, 44_000, 20_000, 10_000]);
    }
}
