// Per-user sliding-window accumulators.
//
// Each accumulator belongs to exactly one (guild, user) pair and is mutated
// through `&mut self` only, so the owner decides how writers are serialized
// (the trackers keep them inside DashMap entries).
//
// Time is always passed in by the caller. Nothing here reads the clock,
// which keeps the window logic deterministic under test.

use super::protection_models::MessageRef;
use super::similarity::similarity;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashSet, VecDeque};

/// Identical messages older than this no longer count towards spam.
const SPAM_ENTRY_TTL_MINUTES: i64 = 30;

// ============================================================================
// MENTIONS
// ============================================================================

/// Counts @mentions one user produced inside a trailing window.
#[derive(Debug, Clone)]
pub struct UserMentionStats {
    timestamps: VecDeque<DateTime<Utc>>,
    window: Duration,
    max_tracked: usize,
}

impl UserMentionStats {
    pub fn new(window: Duration, max_tracked: usize) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window,
            max_tracked: max_tracked.max(1),
        }
    }

    /// Record `mention_count` mentions at `now`.
    ///
    /// Returns `true` when the mentions inside the window reach `threshold`.
    /// A count of zero still prunes expired entries but can never trigger.
    pub fn add_mentions(&mut self, mention_count: u32, threshold: u32, now: DateTime<Utc>) -> bool {
        self.prune(now);

        if mention_count == 0 {
            return false;
        }

        let in_window = self.timestamps.len() + mention_count as usize;

        // Only the newest `max_tracked` stamps are worth keeping.
        let to_store = (mention_count as usize).min(self.max_tracked);
        for _ in 0..to_store {
            self.timestamps.push_back(now);
        }
        while self.timestamps.len() > self.max_tracked {
            self.timestamps.pop_front();
        }

        in_window >= threshold as usize
    }

    /// Mentions currently held (may include stale entries until the next add).
    pub fn tracked(&self) -> usize {
        self.timestamps.len()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while self
            .timestamps
            .front()
            .is_some_and(|t| now - *t > self.window)
        {
            self.timestamps.pop_front();
        }
    }
}

// ============================================================================
// MASS POST
// ============================================================================

/// A message as seen by the mass-post detector.
#[derive(Debug, Clone)]
pub struct PostedMessage {
    pub message_id: u64,
    pub channel_id: u64,
    pub content: String,
}

/// Per-call thresholds for [`UserMassPostStats::add_message`].
#[derive(Debug, Clone, Copy)]
pub struct MassPostCheck {
    pub channel_threshold: u32,
    /// Inclusive, 0.0..=1.0
    pub similarity_threshold: f64,
    pub require_identical: bool,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone)]
struct TrackedPost {
    message_id: u64,
    channel_id: u64,
    /// Already normalized for case
    content: String,
    posted_at: DateTime<Utc>,
}

/// Tracks one user's recent posts to spot the same content hitting many channels.
#[derive(Debug, Clone)]
pub struct UserMassPostStats {
    posts: VecDeque<TrackedPost>,
    window: Duration,
    max_tracked: usize,
}

impl UserMassPostStats {
    pub fn new(window: Duration, max_tracked: usize) -> Self {
        Self {
            posts: VecDeque::new(),
            window,
            max_tracked: max_tracked.max(1),
        }
    }

    /// Record a post and check whether it completes a cross-channel burst.
    ///
    /// Returns every similar tracked message (the new one included) when
    /// they span at least `channel_threshold` distinct channels.
    pub fn add_message(
        &mut self,
        message: PostedMessage,
        check: MassPostCheck,
        now: DateTime<Utc>,
    ) -> Option<Vec<MessageRef>> {
        while self
            .posts
            .front()
            .is_some_and(|p| now - p.posted_at > self.window)
        {
            self.posts.pop_front();
        }

        // Make room before inserting so the newest post is always kept.
        while self.posts.len() >= self.max_tracked {
            self.posts.pop_front();
        }

        let content = if check.case_sensitive {
            message.content
        } else {
            message.content.to_lowercase()
        };

        self.posts.push_back(TrackedPost {
            message_id: message.message_id,
            channel_id: message.channel_id,
            content,
            posted_at: now,
        });

        let newest = self.posts.back()?;
        let similar: Vec<&TrackedPost> = self
            .posts
            .iter()
            .filter(|p| {
                if check.require_identical {
                    p.content == newest.content
                } else {
                    similarity(&p.content, &newest.content) >= check.similarity_threshold
                }
            })
            .collect();

        if similar.len() < 2 {
            return None;
        }

        let channels: HashSet<u64> = similar.iter().map(|p| p.channel_id).collect();
        if channels.len() < check.channel_threshold as usize {
            return None;
        }

        Some(
            similar
                .iter()
                .map(|p| MessageRef {
                    channel_id: p.channel_id,
                    message_id: p.message_id,
                })
                .collect(),
        )
    }

    pub fn tracked(&self) -> usize {
        self.posts.len()
    }
}

// ============================================================================
// REPEATED MESSAGES
// ============================================================================

/// Counts how many times in a row a user sent the same message.
#[derive(Debug, Clone)]
pub struct UserSpamStats {
    last_message: String,
    hits: VecDeque<DateTime<Utc>>,
}

impl UserSpamStats {
    pub fn new(content: &str, now: DateTime<Utc>) -> Self {
        let mut stats = Self {
            last_message: normalize_spam(content),
            hits: VecDeque::new(),
        };
        stats.hits.push_back(now);
        stats
    }

    /// Apply the next message from this user and return the current streak.
    ///
    /// Different content (or a blank message) starts a new streak.
    pub fn apply_next_message(&mut self, content: &str, now: DateTime<Utc>) -> usize {
        let normalized = normalize_spam(content);
        if normalized != self.last_message || normalized.trim().is_empty() {
            self.last_message = normalized;
            self.hits.clear();
        }

        let ttl = Duration::minutes(SPAM_ENTRY_TTL_MINUTES);
        while self.hits.front().is_some_and(|t| now - *t > ttl) {
            self.hits.pop_front();
        }

        self.hits.push_back(now);
        self.hits.len()
    }

    pub fn count(&self) -> usize {
        self.hits.len()
    }
}

fn normalize_spam(content: &str) -> String {
    content.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn post(message_id: u64, channel_id: u64, content: &str) -> PostedMessage {
        PostedMessage {
            message_id,
            channel_id,
            content: content.to_string(),
        }
    }

    fn identical(channel_threshold: u32) -> MassPostCheck {
        MassPostCheck {
            channel_threshold,
            similarity_threshold: 1.0,
            require_identical: true,
            case_sensitive: false,
        }
    }

    #[test]
    fn test_mentions_trigger_at_threshold() {
        let mut stats = UserMentionStats::new(Duration::seconds(10), 100);

        assert!(!stats.add_mentions(2, 5, at(0)));
        assert!(!stats.add_mentions(2, 5, at(1)));
        assert!(stats.add_mentions(1, 5, at(2)));
    }

    #[test]
    fn test_zero_mentions_prune_but_never_trigger() {
        let mut stats = UserMentionStats::new(Duration::seconds(10), 100);
        stats.add_mentions(4, 100, at(0));

        assert!(!stats.add_mentions(0, 1, at(30)));
        assert_eq!(stats.tracked(), 0);
    }

    #[test]
    fn test_expired_mentions_do_not_count() {
        let mut stats = UserMentionStats::new(Duration::seconds(10), 100);

        assert!(!stats.add_mentions(4, 5, at(0)));
        // 11 seconds later the first batch is gone
        assert!(!stats.add_mentions(4, 5, at(11)));
        assert!(stats.add_mentions(1, 5, at(12)));
    }

    #[test]
    fn test_mentions_capped_at_max_tracked() {
        let mut stats = UserMentionStats::new(Duration::seconds(60), 3);

        assert!(stats.add_mentions(50, 10, at(0)));
        assert_eq!(stats.tracked(), 3);
    }

    #[test]
    fn test_identical_posts_across_three_channels_detected() {
        let mut stats = UserMassPostStats::new(Duration::seconds(60), 50);
        let check = identical(3);

        assert!(stats.add_message(post(1, 10, "join my server"), check, at(0)).is_none());
        assert!(stats.add_message(post(2, 11, "join my server"), check, at(1)).is_none());
        let hits = stats
            .add_message(post(3, 12, "join my server"), check, at(2))
            .expect("third channel should trigger");

        let mut ids: Vec<u64> = hits.iter().map(|m| m.message_id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_channel_threshold_not_reached() {
        let mut stats = UserMassPostStats::new(Duration::seconds(60), 50);
        let check = identical(4);

        for (i, channel) in [10, 11, 12].into_iter().enumerate() {
            let result = stats.add_message(post(i as u64, channel, "join my server"), check, at(i as i64));
            assert!(result.is_none());
        }
    }

    #[test]
    fn test_same_channel_repeats_do_not_count_as_spread() {
        let mut stats = UserMassPostStats::new(Duration::seconds(60), 50);
        let check = identical(2);

        assert!(stats.add_message(post(1, 10, "hello"), check, at(0)).is_none());
        assert!(stats.add_message(post(2, 10, "hello"), check, at(1)).is_none());
        assert!(stats.add_message(post(3, 11, "hello"), check, at(2)).is_some());
    }

    #[test]
    fn test_old_posts_pruned_before_evaluation() {
        let mut stats = UserMassPostStats::new(Duration::seconds(30), 50);
        let check = identical(2);

        assert!(stats.add_message(post(1, 10, "promo"), check, at(0)).is_none());
        // Outside the 30s window, so only one similar message remains.
        assert!(stats.add_message(post(2, 11, "promo"), check, at(31)).is_none());
        assert_eq!(stats.tracked(), 1);
    }

    #[test]
    fn test_case_sensitivity() {
        let mut insensitive = UserMassPostStats::new(Duration::seconds(60), 50);
        let check = identical(2);
        insensitive.add_message(post(1, 10, "FREE NITRO"), check, at(0));
        assert!(insensitive
            .add_message(post(2, 11, "free nitro"), check, at(1))
            .is_some());

        let mut sensitive = UserMassPostStats::new(Duration::seconds(60), 50);
        let check = MassPostCheck {
            case_sensitive: true,
            ..identical(2)
        };
        sensitive.add_message(post(1, 10, "FREE NITRO"), check, at(0));
        assert!(sensitive
            .add_message(post(2, 11, "free nitro"), check, at(1))
            .is_none());
    }

    #[test]
    fn test_similar_but_not_identical_posts() {
        let mut stats = UserMassPostStats::new(Duration::seconds(60), 50);
        let check = MassPostCheck {
            channel_threshold: 2,
            similarity_threshold: 0.8,
            require_identical: false,
            case_sensitive: false,
        };

        stats.add_message(post(1, 10, "free nitro at example.com"), check, at(0));
        let hits = stats.add_message(post(2, 11, "free nitro at example.org"), check, at(1));
        assert_eq!(hits.map(|h| h.len()), Some(2));
    }

    #[test]
    fn test_newest_post_survives_eviction() {
        let mut stats = UserMassPostStats::new(Duration::seconds(60), 2);
        let check = identical(2);

        stats.add_message(post(1, 10, "a"), check, at(0));
        stats.add_message(post(2, 11, "b"), check, at(1));
        let hits = stats.add_message(post(3, 12, "b"), check, at(2)).unwrap();

        let ids: Vec<u64> = hits.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(stats.tracked(), 2);
    }

    #[test]
    fn test_spam_streak_resets_on_new_content() {
        let mut stats = UserSpamStats::new("buy now", at(0));
        assert_eq!(stats.apply_next_message("BUY NOW", at(1)), 2);
        assert_eq!(stats.apply_next_message("something else", at(2)), 1);
        assert_eq!(stats.apply_next_message("something else", at(3)), 2);
    }

    #[test]
    fn test_spam_hits_expire() {
        let mut stats = UserSpamStats::new("hi", at(0));
        assert_eq!(stats.apply_next_message("hi", at(31 * 60)), 1);
    }

    #[test]
    fn test_blank_messages_never_build_a_streak() {
        let mut stats = UserSpamStats::new("", at(0));
        assert_eq!(stats.apply_next_message("", at(1)), 1);
        assert_eq!(stats.count(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn mass_post_never_exceeds_max_tracked(
            max_tracked in 1usize..8,
            posts in proptest::collection::vec((0u64..4, "[ab]{0,3}", 0i64..5), 0..40),
        ) {
            let mut stats = UserMassPostStats::new(Duration::seconds(3), max_tracked);
            let mut clock = 0;
            for (i, (channel, content, step)) in posts.into_iter().enumerate() {
                clock += step;
                stats.add_message(post(i as u64, channel, &content), identical(2), at(clock));
                prop_assert!(stats.tracked() <= max_tracked);
            }
        }

        #[test]
        fn mention_detection_matches_window_count(
            batches in proptest::collection::vec((0u32..4, 0i64..6), 1..30),
            threshold in 1u32..10,
        ) {
            let window: i64 = 10;
            let mut stats = UserMentionStats::new(Duration::seconds(window), 1_000);
            let mut history: Vec<(i64, u32)> = Vec::new();
            let mut clock = 0;

            for (count, step) in batches {
                clock += step;
                history.push((clock, count));
                let expected: u32 = history
                    .iter()
                    .filter(|(t, _)| clock - t <= window)
                    .map(|(_, c)| c)
                    .sum();

                let detected = stats.add_mentions(count, threshold, at(clock));
                prop_assert_eq!(detected, count > 0 && expected >= threshold);
            }
        }
    }
}
