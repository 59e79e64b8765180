//! Event classification
//!
//! One typed parse of the inbound object, then a fixed dispatch order where
//! the first matching shape wins:
//!
//! ```text
//! heartbeat code        → Heartbeat (dropped)
//! tip                   → Tip
//! user_arr / user       → profile merges carried on the event
//! active coin_drop      → CoinDrop
//! deposit_withdraw      → DepositWithdraw
//! bet                   → SingleBet
//! bets                  → BatchBet
//! chatMessage           → Chat
//! only merges           → PresenceOnly
//! nothing               → Unrecognized
//! ```

use super::de;
use super::types::{
    normalize_currency, BalanceChange, BetEvent, ChatEvent, CoinDropEvent, EventKind,
    ProfilePatch, TipEvent, TransferDirection, TransferEvent, TypedEvent,
};
use crate::error::ClassificationMiss;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::Value;

/// `coin_drop.status` value of a drop that is live
pub const COIN_DROP_ACTIVE: i64 = 1;

/// `chat_message.type` of a plain text message
pub const CHAT_MESSAGE_TYPE: &str = "chatMessage";

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Heartbeat,
    Event(TypedEvent),
    Unrecognized(ClassificationMiss),
}

// ---------------------------------------------------------------------------
// Inbound wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct InboundMessage {
    #[serde(default, deserialize_with = "de::lenient_i64")]
    code: Option<i64>,
    #[serde(default, deserialize_with = "de::lenient")]
    data: Option<Payload>,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default, deserialize_with = "de::lenient")]
    chat_message: Option<ChatMessagePayload>,
    #[serde(default, deserialize_with = "de::lenient")]
    tip: Option<TipPayload>,
    #[serde(default, deserialize_with = "de::lenient")]
    coin_drop: Option<CoinDropPayload>,
    #[serde(default, deserialize_with = "de::lenient")]
    bet: Option<BetPayload>,
    #[serde(default, deserialize_with = "de::lenient")]
    bets: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatMessagePayload {
    #[serde(rename = "type", default, deserialize_with = "de::lenient_string")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "de::lenient_string")]
    message: Option<String>,
    #[serde(default, deserialize_with = "de::lenient")]
    user: Option<ProfilePatch>,
    #[serde(default)]
    user_arr: Option<Value>,
    #[serde(default, deserialize_with = "de::lenient")]
    tip: Option<TipPayload>,
    #[serde(default, deserialize_with = "de::lenient")]
    coin_drop: Option<CoinDropPayload>,
    #[serde(default, deserialize_with = "de::lenient")]
    deposit_withdraw: Option<TransferPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct TipPayload {
    #[serde(default, deserialize_with = "de::lenient_f64")]
    amount: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_string")]
    currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CoinDropPayload {
    #[serde(default, deserialize_with = "de::lenient_id")]
    rain_id: Option<String>,
    #[serde(default, deserialize_with = "de::lenient_i64")]
    status: Option<i64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    amount: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_string")]
    currency: Option<String>,
    #[serde(default, deserialize_with = "de::lenient_i64")]
    player_number: Option<i64>,
    #[serde(default, alias = "message", deserialize_with = "de::lenient_string")]
    context: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TransferPayload {
    #[serde(rename = "type", default, deserialize_with = "de::lenient_i64")]
    kind: Option<i64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    amount: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_string")]
    currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BetPayload {
    #[serde(default, deserialize_with = "de::lenient")]
    user: Option<ProfilePatch>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    amount: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_f64")]
    win: Option<f64>,
    #[serde(default, deserialize_with = "de::lenient_string")]
    currency: Option<String>,
    #[serde(default, deserialize_with = "de::lenient_id")]
    record_id: Option<String>,
}

impl BetPayload {
    fn into_event(self) -> BetEvent {
        BetEvent {
            player: self.user.unwrap_or_default(),
            amount: self.amount.unwrap_or(0.0),
            win: self.win.unwrap_or(0.0),
            currency: normalize_currency(self.currency.as_deref()),
            record_id: self.record_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Route a decrypted object to exactly one event kind
pub fn classify(value: Value, heartbeat_code: i64) -> Classification {
    let message: InboundMessage = match serde_json::from_value(value) {
        Ok(message) => message,
        Err(_) => return Classification::Unrecognized(ClassificationMiss { code: None }),
    };

    let code = message.code;
    if code == Some(heartbeat_code) {
        return Classification::Heartbeat;
    }

    let data = message.data.unwrap_or_default();
    let chat = data.chat_message.unwrap_or_default();

    if let Some(tip) = chat.tip.or(data.tip) {
        let user = chat.user.unwrap_or_default();
        let event = TipEvent {
            player_id: user.uid.clone(),
            player_name: user.name.clone(),
            amount: tip.amount.unwrap_or(0.0),
            currency: normalize_currency(tip.currency.as_deref()),
        };
        return Classification::Event(TypedEvent::new(code, EventKind::Tip(event)));
    }

    let mut event = TypedEvent::new(code, EventKind::PresenceOnly);

    if let Some(user_arr) = &chat.user_arr {
        for patch in user_arr_patches(user_arr) {
            if let (Some(uid), Some(balance)) = (&patch.uid, patch.redeem_usd) {
                event.balances.push(BalanceChange {
                    uid: uid.clone(),
                    balance,
                });
            }
            event.presence.push(patch);
        }
    }
    if let Some(user) = chat.user.as_ref().filter(|u| u.uid.is_some()) {
        event.presence.push(user.clone());
    }
    if let Some(user) = data
        .bet
        .as_ref()
        .and_then(|bet| bet.user.as_ref())
        .filter(|u| u.uid.is_some())
    {
        event.presence.push(user.clone());
    }

    if let Some(drop) = chat.coin_drop.or(data.coin_drop) {
        if let (Some(drop_id), Some(COIN_DROP_ACTIVE)) = (drop.rain_id.clone(), drop.status) {
            event.kind = EventKind::CoinDrop(CoinDropEvent {
                drop_id,
                amount: drop.amount.unwrap_or(0.0),
                currency: normalize_currency(drop.currency.as_deref()),
                recipient_count: drop.player_number.unwrap_or(0),
                context: drop.context,
            });
            return Classification::Event(event);
        }
    }

    if let Some(transfer) = chat.deposit_withdraw {
        let player = chat.user.filter(|u| u.uid.is_some());
        match (transfer.kind.and_then(TransferDirection::from_code), player) {
            (Some(direction), Some(player)) => {
                event.kind = EventKind::DepositWithdraw(TransferEvent {
                    player,
                    direction,
                    amount: transfer.amount.unwrap_or(0.0),
                    currency: normalize_currency(transfer.currency.as_deref()),
                });
                return Classification::Event(event);
            }
            (None, _) => {
                log::debug!("Unknown deposit_withdraw type: {:?}", transfer.kind);
                return finish(event);
            }
            (Some(_), None) => {
                log::debug!("deposit_withdraw without a player uid");
                return finish(event);
            }
        }
    }

    if let Some(bet) = data.bet {
        event.kind = EventKind::SingleBet(bet.into_event());
        return Classification::Event(event);
    }

    if let Some(bets) = data.bets {
        let bets: Vec<BetEvent> = bets
            .into_iter()
            .filter_map(|raw| serde_json::from_value::<BetPayload>(raw).ok())
            .map(BetPayload::into_event)
            .collect();
        if bets.is_empty() {
            return finish(event);
        }
        event.kind = EventKind::BatchBet(bets);
        return Classification::Event(event);
    }

    if chat.kind.as_deref() == Some(CHAT_MESSAGE_TYPE) {
        if let Some(user) = chat.user.filter(|u| u.uid.is_some()) {
            let raw = chat.message.unwrap_or_default();
            event.kind = EventKind::Chat(ChatEvent {
                player_id: user.uid.clone().unwrap_or_default(),
                player_name: user.name.clone(),
                message: percent_decode_str(&raw).decode_utf8_lossy().into_owned(),
            });
            return Classification::Event(event);
        }
    }

    finish(event)
}

/// Presence-only when merges were collected, otherwise a miss
fn finish(event: TypedEvent) -> Classification {
    if event.presence.is_empty() {
        Classification::Unrecognized(ClassificationMiss { code: event.code })
    } else {
        Classification::Event(event)
    }
}

/// `user_arr` arrives keyed by uid or as a plain list
fn user_arr_patches(user_arr: &Value) -> Vec<ProfilePatch> {
    let entries: Vec<&Value> = match user_arr {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|v| serde_json::from_value::<ProfilePatch>(v.clone()).ok())
        .filter(|patch| patch.uid.is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HEARTBEAT: i64 = 3121;

    fn event(value: Value) -> TypedEvent {
        match classify(value, HEARTBEAT) {
            Classification::Event(event) => event,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat() {
        assert_eq!(classify(json!({"code": 3121, "data": {}}), HEARTBEAT), Classification::Heartbeat);
    }

    #[test]
    fn test_tip_nested_under_chat_message() {
        let e = event(json!({
            "code": 3053,
            "data": {"chat_message": {
                "user": {"uid": 9, "name": "bob"},
                "tip": {"amount": "2.5", "currency": "GOLD"}
            }}
        }));

        assert!(e.presence.is_empty());
        match e.kind {
            EventKind::Tip(tip) => {
                assert_eq!(tip.player_id.as_deref(), Some("9"));
                assert_eq!(tip.player_name.as_deref(), Some("bob"));
                assert_eq!(tip.amount, 2.5);
                assert_eq!(tip.currency, "gold");
            }
            other => panic!("expected tip, got {:?}", other),
        }
    }

    #[test]
    fn test_top_level_tip_without_user() {
        let e = event(json!({"code": 1, "data": {"tip": {"amount": 1}}}));
        assert!(matches!(e.kind, EventKind::Tip(TipEvent { player_id: None, .. })));
    }

    #[test]
    fn test_user_arr_presence_with_balances() {
        let e = event(json!({
            "code": 3078,
            "data": {"chat_message": {"user_arr": {
                "1": {"uid": 1, "name": "a", "redeem_usd": "12.5"},
                "2": {"uid": 2, "name": "b"},
                "3": {"name": "no uid"}
            }}}
        }));

        assert_eq!(e.kind, EventKind::PresenceOnly);
        assert_eq!(e.presence.len(), 2);
        assert_eq!(e.balances, vec![BalanceChange { uid: "1".into(), balance: 12.5 }]);
    }

    #[test]
    fn test_chat_user_only_is_presence() {
        let e = event(json!({"data": {"chat_message": {"type": "system", "user": {"uid": "5", "level": 4}}}}));
        assert_eq!(e.kind, EventKind::PresenceOnly);
        assert_eq!(e.presence[0].level, Some(4));
    }

    #[test]
    fn test_active_coin_drop() {
        let e = event(json!({
            "code": 3700,
            "data": {"coin_drop": {
                "rain_id": 77, "status": 1, "amount": "100", "currency": "USD",
                "player_number": 25, "message": "rain!"
            }}
        }));

        match e.kind {
            EventKind::CoinDrop(drop) => {
                assert_eq!(drop.drop_id, "77");
                assert_eq!(drop.amount, 100.0);
                assert_eq!(drop.currency, "usd");
                assert_eq!(drop.recipient_count, 25);
                assert_eq!(drop.context.as_deref(), Some("rain!"));
            }
            other => panic!("expected coin drop, got {:?}", other),
        }
    }

    #[test]
    fn test_inactive_coin_drop_falls_through() {
        let result = classify(
            json!({"code": 3700, "data": {"coin_drop": {"rain_id": 77, "status": 2}}}),
            HEARTBEAT,
        );
        assert_eq!(result, Classification::Unrecognized(ClassificationMiss { code: Some(3700) }));
    }

    #[test]
    fn test_deposit_and_withdraw() {
        let deposit = event(json!({"data": {"chat_message": {
            "user": {"uid": 3, "name": "c"},
            "deposit_withdraw": {"type": 1, "amount": 50, "currency": "usd"}
        }}}));
        match deposit.kind {
            EventKind::DepositWithdraw(t) => {
                assert_eq!(t.direction, TransferDirection::Deposit);
                assert_eq!(t.player.uid.as_deref(), Some("3"));
                assert_eq!(t.amount, 50.0);
            }
            other => panic!("expected deposit, got {:?}", other),
        }

        let withdraw = event(json!({"data": {"chat_message": {
            "user": {"uid": 3},
            "deposit_withdraw": {"type": "2", "amount": "7"}
        }}}));
        assert!(matches!(
            withdraw.kind,
            EventKind::DepositWithdraw(TransferEvent { direction: TransferDirection::Withdraw, .. })
        ));

        // Unknown discriminant leaves only the profile merge
        let unknown = event(json!({"data": {"chat_message": {
            "user": {"uid": 3},
            "deposit_withdraw": {"type": 9}
        }}}));
        assert_eq!(unknown.kind, EventKind::PresenceOnly);
    }

    #[test]
    fn test_deposit_without_uid_is_not_a_transfer() {
        let no_user = json!({"code": 4020, "data": {"chat_message": {
            "deposit_withdraw": {"type": 1, "amount": 50}
        }}});
        assert_eq!(
            classify(no_user, HEARTBEAT),
            Classification::Unrecognized(ClassificationMiss { code: Some(4020) })
        );

        let uidless = json!({"code": 4020, "data": {"chat_message": {
            "user": {"name": "ghost"},
            "deposit_withdraw": {"type": 2, "amount": 5}
        }}});
        assert!(matches!(classify(uidless, HEARTBEAT), Classification::Unrecognized(_)));
    }

    #[test]
    fn test_single_bet_carries_user_presence() {
        let e = event(json!({"code": 3513, "data": {"bet": {
            "user": {"uid": 11, "name": "d", "redeem_usd": 900},
            "amount": "1.5", "win": "3", "currency": "gold", "record_id": "r-1"
        }}}));

        assert_eq!(e.code, Some(3513));
        assert_eq!(e.presence.len(), 1);
        match e.kind {
            EventKind::SingleBet(bet) => {
                assert_eq!(bet.player_id(), Some("11"));
                assert_eq!(bet.amount, 1.5);
                assert_eq!(bet.win, 3.0);
                assert_eq!(bet.record_id.as_deref(), Some("r-1"));
            }
            other => panic!("expected bet, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_bets() {
        let e = event(json!({"data": {"bets": [
            {"user": {"uid": 1}, "amount": 1, "win": 0, "currency": "usd"},
            "garbage",
            {"user": {"uid": 2}, "amount": 2, "win": 4, "currency": "usd", "record_id": 5}
        ]}}));

        match e.kind {
            EventKind::BatchBet(bets) => {
                assert_eq!(bets.len(), 2);
                assert_eq!(bets[1].record_id.as_deref(), Some("5"));
            }
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_message_percent_decoded() {
        let e = event(json!({"code": 3053, "data": {"chat_message": {
            "type": "chatMessage",
            "message": "gl%20everyone%20%F0%9F%8D%80",
            "user": {"uid": 8, "name": "eve"}
        }}}));

        match e.kind {
            EventKind::Chat(chat) => {
                assert_eq!(chat.player_id, "8");
                assert_eq!(chat.message, "gl everyone 🍀");
            }
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognized_shapes() {
        for value in [json!({"code": 3555, "data": {"balance": 1}}), json!({"code": 3555}), json!([1, 2])] {
            assert!(matches!(classify(value, HEARTBEAT), Classification::Unrecognized(_)));
        }
    }

    #[test]
    fn test_tip_wins_over_coin_drop() {
        let e = event(json!({"data": {
            "tip": {"amount": 1, "currency": "usd"},
            "coin_drop": {"rain_id": 1, "status": 1}
        }}));
        assert_eq!(e.kind.label(), "tip");
    }
}
