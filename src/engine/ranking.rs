//! Ranking engine.
//!
//! Pure derivations over team rows and bid history: live standings for
//! the views, winner resolution at round close. No state of its own.

use crate::types::{BidRef, RankedTeam, RoundResult};

/// Assign 1-based ranks to teams already in standing order (current bid
/// descending, earlier last-bid first among ties).
///
/// Ties share a rank; each new distinct amount advances the counter by
/// one (1000/1000/800 ranks as 1, 1, 2). Teams that have not bid get no
/// rank.
pub fn assign_ranks(teams: &mut [RankedTeam]) {
    let mut rank = 0u32;
    let mut last_amount: Option<i64> = None;

    for team in teams.iter_mut() {
        if team.current_bid == 0 {
            team.rank = None;
            continue;
        }
        match last_amount {
            Some(amount) if amount == team.current_bid => team.rank = Some(rank),
            _ => {
                rank += 1;
                team.rank = Some(rank);
                last_amount = Some(team.current_bid);
            }
        }
    }
}

/// The highest current bid across all teams.
pub fn highest_bid(teams: &[RankedTeam]) -> i64 {
    teams.iter().map(|t| t.current_bid).max().unwrap_or(0)
}

/// Resolve winner, second-highest, and fastest bidder from a round's
/// full bid history.
///
/// Runs over every bid of the round, not live team state, so a
/// cancelled-then-outbid ladder still resolves correctly. The winner is
/// the highest amount, earliest timestamp breaking ties. Second-highest
/// is the first strictly smaller amount (skipping ties at the top),
/// falling back to the second row when every bid is tied. Fastest is the
/// earliest bid of the round regardless of amount.
pub fn compute_winners(bids: &[BidRef]) -> RoundResult {
    if bids.is_empty() {
        return RoundResult::default();
    }

    let mut ordered: Vec<&BidRef> = bids.iter().collect();
    ordered.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.timestamp.cmp(&b.timestamp)));

    let winner = ordered[0].clone();
    let second_highest = ordered
        .iter()
        .find(|b| b.amount < winner.amount)
        .or_else(|| ordered.get(1))
        .map(|b| (*b).clone());
    let fastest_bidder = ordered
        .iter()
        .min_by_key(|b| b.timestamp)
        .map(|b| (*b).clone());

    RoundResult {
        winner: Some(winner),
        second_highest,
        fastest_bidder,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
