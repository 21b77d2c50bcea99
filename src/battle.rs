// Battle resolution workflow: cooldown gate, opponent selection, verdict,
// and the atomic rating-update-plus-record step.

use serde::Serialize;

use crate::db::{Character, Database};
use crate::elo::{self, Outcome};
use crate::judge::{JudgeClient, Verdict};
use crate::locks::BattleLocks;
use crate::metrics;

/// Minimum interval between one character's consecutive battles.
pub const COOLDOWN_SECS: i64 = 60;

/// Verdict source tags, stored on the battle row and echoed to clients.
pub const REASON_JUDGE: &str = "ai-judge";
pub const REASON_FALLBACK: &str = "elo-fallback";

#[derive(Debug, thiserror::Error)]
pub enum BattleError {
    #[error("cooldown active, {remain}s remaining")]
    Cooldown { remain: i64 },
    #[error("no available opponent")]
    NoOpponent,
    #[error("requesting character not found")]
    UnknownCharacter,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Serialize)]
pub struct BattleOutcome {
    /// The requesting character, re-read after the commit.
    #[serde(rename = "A")]
    pub a: Character,
    /// The opponent, re-read after the commit.
    #[serde(rename = "B")]
    pub b: Character,
    pub result: BattleResult,
}

#[derive(Debug, Serialize)]
pub struct BattleResult {
    pub winner: String,
    pub winner_id: i64,
    pub reason: String,
    pub log: String,
}

/// Seconds a character must still wait before their next battle, based on
/// their most recent battle on either side. Zero means permitted.
pub async fn cooldown_remaining(
    db: &Database,
    character_id: i64,
    now_epoch: i64,
) -> Result<i64, sqlx::Error> {
    Ok(match db.last_battle_epoch(character_id).await? {
        Some(last) => (last + COOLDOWN_SECS - now_epoch).max(0),
        None => 0,
    })
}

/// Deterministic verdict used when the external judge is unavailable:
/// the strictly higher rating wins, an exact tie goes to the smaller id.
/// Pure and total, so a winner always exists.
pub fn fallback_verdict(a: &Character, b: &Character) -> Verdict {
    let a_wins = match a.elo.cmp(&b.elo) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => a.id < b.id,
    };
    let winner = if a_wins { a } else { b };
    Verdict {
        winner: winner.name.clone(),
        log: format!(
            "{} and {} traded blows until {} broke through and took the round on sheer form.",
            a.name, b.name, winner.name
        ),
    }
}

/// Resolve one battle for the requesting character, end to end:
/// advisory lock, cooldown gate, opponent selection, verdict (external
/// judge, elo fallback on unavailability), then the atomic rating update
/// and battle insert. Both rows are re-read after the commit.
pub async fn run_battle(
    db: &Database,
    judge: Option<&JudgeClient>,
    locks: &BattleLocks,
    character_id: i64,
) -> Result<BattleOutcome, BattleError> {
    // Held until return so the cooldown check and the commit below cannot
    // interleave with a second request from the same character.
    let _guard = locks.acquire(character_id).await;

    let now = chrono::Utc::now().timestamp();
    let remain = cooldown_remaining(db, character_id, now).await?;
    if remain > 0 {
        metrics::COOLDOWN_REJECTIONS_TOTAL.inc();
        return Err(BattleError::Cooldown { remain });
    }

    let me = db
        .get_character(character_id)
        .await?
        .ok_or(BattleError::UnknownCharacter)?;
    let opponent = db
        .pick_opponent(character_id)
        .await?
        .ok_or(BattleError::NoOpponent)?;

    let (verdict, reason) = match judge {
        Some(client) => match client.judge(&me, &opponent).await {
            Some(v) => (v, REASON_JUDGE),
            None => {
                tracing::warn!(a = %me.name, b = %opponent.name, "judge unavailable, using elo fallback");
                (fallback_verdict(&me, &opponent), REASON_FALLBACK)
            }
        },
        None => (fallback_verdict(&me, &opponent), REASON_FALLBACK),
    };

    let (winner, loser) = if verdict.winner == me.name {
        (&me, &opponent)
    } else {
        (&opponent, &me)
    };
    let winner_id = winner.id;

    // Both new ratings come from the pre-battle values.
    let winner_elo = elo::calculate_new_rating(winner.elo, loser.elo, Outcome::Win);
    let loser_elo = elo::calculate_new_rating(loser.elo, winner.elo, Outcome::Loss);

    db.record_battle(
        me.id,
        opponent.id,
        winner_id,
        winner_elo,
        loser.id,
        loser_elo,
        reason,
        &verdict.log,
    )
    .await?;

    metrics::BATTLES_TOTAL.with_label_values(&[reason]).inc();

    // Re-read both rows so the response reflects exactly what is in the
    // store, even if something else touched them meanwhile.
    let a = db
        .get_character(me.id)
        .await?
        .ok_or(BattleError::UnknownCharacter)?;
    let b = db
        .get_character(opponent.id)
        .await?
        .ok_or(BattleError::UnknownCharacter)?;

    Ok(BattleOutcome {
        a,
        b,
        result: BattleResult {
            winner: verdict.winner,
            winner_id,
            reason: reason.to_string(),
            log: verdict.log,
        },
    })
}
