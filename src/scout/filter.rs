/// Per-user filter evaluation.
///
/// A pure, ordered rule chain over an enriched token record. The first
/// failing rule short-circuits and names itself in the outcome so the
/// rejection can be reported to the user. Every rule is fail-closed: a
/// field the providers could not fill counts as a failure, never a pass.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::types::{TokenRecord, UserConfig};

/// Tokens younger than this are too fresh to trust provider data (15 minutes)
const MIN_TOKEN_AGE_SECS: i64 = 15 * 60;
/// Tokens older than this have lost their launch momentum (72 hours)
const MAX_TOKEN_AGE_SECS: i64 = 72 * 3600;
const MIN_MARKET_CAP_USD: f64 = 30_000.0;
const MIN_HOLDER_COUNT: u64 = 20;
const MAX_RISK_SCORE: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Pass,
    Reject { rule: &'static str },
}

impl FilterOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, FilterOutcome::Pass)
    }
}

/// Evaluate `record` against `user`'s rules at time `now`.
///
/// Deterministic: same inputs, same outcome, no I/O.
pub fn evaluate(record: &TokenRecord, user: &UserConfig, now: DateTime<Utc>) -> FilterOutcome {
    let checks: [(&'static str, bool); 13] = [
        (
            "socials",
            !user.require_socials || record.has_socials == Some(true),
        ),
        (
            "liquidity_burnt",
            !user.require_liquidity_burnt || record.liquidity_burnt == Some(true),
        ),
        (
            "immutable_metadata",
            !user.require_immutable_metadata || record.immutable_metadata == Some(true),
        ),
        (
            "mint_authority_renounced",
            !user.require_mint_renounced || record.mint_authority_renounced == Some(true),
        ),
        (
            "freeze_authority_revoked",
            !user.require_freeze_revoked || record.freeze_authority_revoked == Some(true),
        ),
        (
            "min_pool_size",
            record
                .pool_size_sol
                .map(|sol| sol >= user.min_pool_size_sol)
                .unwrap_or(false),
        ),
        (
            "token_age",
            record
                .age_secs(now)
                .map(|age| (MIN_TOKEN_AGE_SECS..=MAX_TOKEN_AGE_SECS).contains(&age))
                .unwrap_or(false),
        ),
        (
            "market_cap",
            record
                .market_cap_usd
                .map(|cap| cap >= MIN_MARKET_CAP_USD)
                .unwrap_or(false),
        ),
        (
            "holder_count",
            record
                .holder_count
                .map(|count| count >= MIN_HOLDER_COUNT)
                .unwrap_or(false),
        ),
        (
            "risk_score",
            record
                .risk_score
                .map(|score| score <= MAX_RISK_SCORE)
                .unwrap_or(false),
        ),
        // Premium-only rules; non-premium users skip them entirely
        (
            "top10_concentration",
            !user.premium
                || match user.max_top10_holder_pct {
                    Some(max) => record
                        .top10_holder_pct
                        .map(|pct| pct <= max)
                        .unwrap_or(false),
                    None => true,
                },
        ),
        (
            "safety_window",
            !user.premium
                || match user.safety_window_secs {
                    Some(window) => record
                        .age_secs(now)
                        .map(|age| age >= window as i64)
                        .unwrap_or(false),
                    None => true,
                },
        ),
        (
            "moon_score",
            !user.premium
                || match user.min_moon_score {
                    Some(min) => record
                        .moon_score
                        .map(|score| score >= min)
                        .unwrap_or(false),
                    None => true,
                },
        ),
    ];

    for (rule, passed) in checks {
        if !passed {
            debug!(mint = %record.mint, wallet = %user.wallet, rule, "Filter rejection");
            return FilterOutcome::Reject { rule };
        }
    }

    FilterOutcome::Pass
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn passing_record(now: DateTime<Utc>) -> TokenRecord {
        TokenRecord {
            mint: "mint".into(),
            name: Some("Token".into()),
            symbol: Some("TKN".into()),
            price_usd: Some(0.01),
            market_cap_usd: Some(60_000.0),
            liquidity_usd: Some(80_000.0),
            pool_size_sol: Some(25.0),
            has_socials: Some(true),
            liquidity_burnt: Some(true),
            immutable_metadata: Some(true),
            mint_authority_renounced: Some(true),
            freeze_authority_revoked: Some(true),
            holder_count: Some(120),
            top10_holder_pct: Some(18.0),
            risk_score: Some(12.0),
            moon_score: Some(88.0),
            created_at: Some(now - Duration::hours(2)),
            fetched_at: now,
            complete: true,
        }
    }

    fn user() -> UserConfig {
        UserConfig::standard("wallet", "key")
    }

    fn premium_user() -> UserConfig {
        UserConfig {
            premium: true,
            max_top10_holder_pct: Some(30.0),
            min_moon_score: Some(80.0),
            safety_window_secs: Some(3600),
            ..user()
        }
    }

    #[test]
    fn clean_record_passes() {
        let now = Utc::now();
        assert_eq!(evaluate(&passing_record(now), &user(), now), FilterOutcome::Pass);
        assert_eq!(
            evaluate(&passing_record(now), &premium_user(), now),
            FilterOutcome::Pass
        );
    }

    #[test]
    fn evaluation_is_deterministic() {
        let now = Utc::now();
        let record = passing_record(now);
        let user = premium_user();
        let first = evaluate(&record, &user, now);
        for _ in 0..10 {
            assert_eq!(evaluate(&record, &user, now), first);
        }
    }

    #[test]
    fn missing_fields_fail_closed() {
        let now = Utc::now();
        let mut record = passing_record(now);
        record.has_socials = None;
        assert_eq!(
            evaluate(&record, &user(), now),
            FilterOutcome::Reject { rule: "socials" }
        );

        let mut record = passing_record(now);
        record.risk_score = None;
        assert_eq!(
            evaluate(&record, &user(), now),
            FilterOutcome::Reject { rule: "risk_score" }
        );

        let mut record = passing_record(now);
        record.created_at = None;
        assert_eq!(
            evaluate(&record, &user(), now),
            FilterOutcome::Reject { rule: "token_age" }
        );
    }

    #[test]
    fn first_failing_rule_names_itself() {
        let now = Utc::now();
        let mut record = passing_record(now);
        record.liquidity_burnt = Some(false);
        record.holder_count = Some(3);
        // liquidity_burnt sits before holder_count in the chain
        assert_eq!(
            evaluate(&record, &user(), now),
            FilterOutcome::Reject { rule: "liquidity_burnt" }
        );
    }

    #[test]
    fn disabled_requirement_skips_rule() {
        let now = Utc::now();
        let mut record = passing_record(now);
        record.has_socials = Some(false);
        let mut relaxed = user();
        relaxed.require_socials = false;
        assert_eq!(evaluate(&record, &relaxed, now), FilterOutcome::Pass);
    }

    #[test]
    fn age_window_bounds() {
        let now = Utc::now();
        let user = user();

        let mut too_young = passing_record(now);
        too_young.created_at = Some(now - Duration::minutes(5));
        assert_eq!(
            evaluate(&too_young, &user, now),
            FilterOutcome::Reject { rule: "token_age" }
        );

        let mut too_old = passing_record(now);
        too_old.created_at = Some(now - Duration::hours(80));
        assert_eq!(
            evaluate(&too_old, &user, now),
            FilterOutcome::Reject { rule: "token_age" }
        );

        let mut in_window = passing_record(now);
        in_window.created_at = Some(now - Duration::minutes(16));
        assert_eq!(evaluate(&in_window, &user, now), FilterOutcome::Pass);
    }

    #[test]
    fn thresholds_reject_below_minimums() {
        let now = Utc::now();
        let user = user();

        let mut small_cap = passing_record(now);
        small_cap.market_cap_usd = Some(29_000.0);
        assert_eq!(
            evaluate(&small_cap, &user, now),
            FilterOutcome::Reject { rule: "market_cap" }
        );

        let mut few_holders = passing_record(now);
        few_holders.holder_count = Some(19);
        assert_eq!(
            evaluate(&few_holders, &user, now),
            FilterOutcome::Reject { rule: "holder_count" }
        );

        let mut risky = passing_record(now);
        risky.risk_score = Some(51.0);
        assert_eq!(
            evaluate(&risky, &user, now),
            FilterOutcome::Reject { rule: "risk_score" }
        );

        let mut shallow = passing_record(now);
        shallow.pool_size_sol = Some(5.0);
        assert_eq!(
            evaluate(&shallow, &user, now),
            FilterOutcome::Reject { rule: "min_pool_size" }
        );
    }

    #[test]
    fn premium_rules_apply_only_to_premium_users() {
        let now = Utc::now();
        let mut record = passing_record(now);
        record.top10_holder_pct = Some(65.0);
        record.moon_score = Some(40.0);

        // Standard users never see premium rules
        assert_eq!(evaluate(&record, &user(), now), FilterOutcome::Pass);

        assert_eq!(
            evaluate(&record, &premium_user(), now),
            FilterOutcome::Reject { rule: "top10_concentration" }
        );

        let mut concentrated_ok = passing_record(now);
        concentrated_ok.moon_score = Some(40.0);
        assert_eq!(
            evaluate(&concentrated_ok, &premium_user(), now),
            FilterOutcome::Reject { rule: "moon_score" }
        );
    }

    #[test]
    fn premium_safety_window_blocks_fresh_tokens() {
        let now = Utc::now();
        let mut record = passing_record(now);
        // Old enough for the base age rule, inside the premium window
        record.created_at = Some(now - Duration::minutes(20));
        let mut user = premium_user();
        user.safety_window_secs = Some(30 * 60);
        assert_eq!(
            evaluate(&record, &user, now),
            FilterOutcome::Reject { rule: "safety_window" }
        );
    }
}
