//! Scorecard evaluator.
//!
//! Reduces raw signals to five dimension scores, a weighted overall score
//! and a letter grade per capability version. Scorecards are persisted under
//! `scorecard/<id>/<version>`.

pub mod signals;

use std::collections::HashMap;
use std::sync::Arc;

use capctl_state::CapabilityStore;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::domain::capability::Capability;
use crate::domain::error::{CapctlError, Result};
use crate::domain::policy::MAX_DURATION_SECS;
use crate::domain::scorecard::{
    scorecard_key, CapabilityScorecard, Dimension, EvaluationEntry, Trend,
};
use crate::domain::scoring::{clamp_unit, ScoringModel};
use crate::obs;

pub use signals::{SignalSnapshot, SignalSource, StaticSignalSource};

pub const DEFAULT_HISTORY_WINDOW: usize = 30;
pub const DEFAULT_EVALUATION_INTERVAL_SECS: u64 = 3600;

/// Overall-score change below this is reported as a stable trend.
const TREND_BAND: f64 = 0.01;

pub struct ScorecardEvaluator {
    store: Arc<dyn CapabilityStore>,
    model: ScoringModel,
    signals: Arc<dyn SignalSource>,
    history_window: usize,
    interval: chrono::Duration,
    cards: RwLock<HashMap<String, CapabilityScorecard>>,
}

impl ScorecardEvaluator {
    pub fn new(
        store: Arc<dyn CapabilityStore>,
        model: ScoringModel,
        signals: Arc<dyn SignalSource>,
    ) -> Self {
        Self {
            store,
            model,
            signals,
            history_window: DEFAULT_HISTORY_WINDOW,
            interval: chrono::Duration::seconds(DEFAULT_EVALUATION_INTERVAL_SECS as i64),
            cards: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window.max(1);
        self
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        let secs = secs.min(MAX_DURATION_SECS) as i64;
        if let Some(interval) = chrono::Duration::try_seconds(secs) {
            self.interval = interval;
        }
        self
    }

    pub fn model(&self) -> &ScoringModel {
        &self.model
    }

    /// Create the zero scorecard for `capability` if none exists yet.
    pub async fn initialize(&self, capability: &Capability) -> Result<CapabilityScorecard> {
        let key = scorecard_key(capability.id(), capability.version());
        let card = {
            let mut cards = self.cards.write().await;
            if let Some(existing) = cards.get(&key) {
                return Ok(existing.clone());
            }
            let card = CapabilityScorecard::empty(
                capability.id(),
                capability.version(),
                self.history_window,
                Utc::now(),
            );
            cards.insert(key, card.clone());
            card
        };
        self.persist(&card).await?;
        debug!(capability_id = %capability.id(), "scorecard initialized");
        Ok(card)
    }

    pub async fn get(&self, capability_id: &str, version: &str) -> Result<CapabilityScorecard> {
        self.cards
            .read()
            .await
            .get(&scorecard_key(capability_id, version))
            .cloned()
            .ok_or_else(|| CapctlError::not_found("scorecard", format!("{capability_id}@{version}")))
    }

    pub async fn get_or_initialize(&self, capability: &Capability) -> Result<CapabilityScorecard> {
        match self.get(capability.id(), capability.version()).await {
            Ok(card) => Ok(card),
            Err(e) if e.is_not_found() => self.initialize(capability).await,
            Err(e) => Err(e),
        }
    }

    /// Collect signals for `capability` and record one evaluation.
    #[instrument(skip(self, capability), fields(capability_id = %capability.id()))]
    pub async fn evaluate(&self, capability: &Capability) -> Result<CapabilityScorecard> {
        let snapshot = self.signals.collect(capability).await?;
        self.apply_snapshot(capability, &snapshot).await
    }

    /// Record one evaluation from an externally supplied snapshot.
    pub async fn update_metrics(
        &self,
        capability: &Capability,
        snapshot: &SignalSnapshot,
    ) -> Result<CapabilityScorecard> {
        self.apply_snapshot(capability, snapshot).await
    }

    async fn apply_snapshot(
        &self,
        capability: &Capability,
        snapshot: &SignalSnapshot,
    ) -> Result<CapabilityScorecard> {
        let key = scorecard_key(capability.id(), capability.version());
        let now = Utc::now();
        let card = {
            let mut cards = self.cards.write().await;
            let card = cards.entry(key).or_insert_with(|| {
                CapabilityScorecard::empty(
                    capability.id(),
                    capability.version(),
                    self.history_window,
                    now,
                )
            });
            self.apply(card, capability, snapshot, now);
            card.clone()
        };
        self.persist(&card).await?;
        info!(
            capability_id = %card.capability_id,
            version = %card.version,
            overall = card.overall,
            grade = %card.grade,
            "scorecard evaluated"
        );
        Ok(card)
    }

    fn apply(
        &self,
        card: &mut CapabilityScorecard,
        capability: &Capability,
        snapshot: &SignalSnapshot,
        now: DateTime<Utc>,
    ) {
        snapshot.merge_into(&mut card.metrics);
        let m = &card.metrics;
        let t = &self.model.targets;

        if snapshot.carries_quality() {
            if let (Some(coverage), Some(pass_rate)) = (m.test_coverage, m.pass_rate()) {
                card.scores.quality = signals::quality_score(coverage, pass_rate);
            }
        }
        if snapshot.vulnerabilities.is_some() {
            card.scores.safety = signals::safety_score(&m.vulnerabilities);
        }
        if snapshot.carries_performance() {
            if let (Some(p95), Some(err)) = (m.latency_p95_ms, m.error_rate) {
                card.scores.performance = signals::performance_score(p95, err, t);
            }
        }
        if let Some(cost) = snapshot.cost_per_1k_calls {
            card.scores.cost = signals::cost_score(cost, t);
        }
        if let Some(score) = snapshot
            .constitutional_score
            .or_else(|| capability.constitutional.as_ref().map(|v| v.overall_score))
        {
            card.scores.constitutional = clamp_unit(score);
        }

        let previous = card.history.back().map(|e| e.overall);
        self.rescore(card, previous);
        card.push_history(EvaluationEntry {
            evaluated_at: now,
            overall: card.overall,
            scores: card.scores,
        });
        card.last_evaluated = Some(now);
        card.next_evaluation = now
            .checked_add_signed(self.interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        card.updated_at = now;
    }

    /// Recompute overall, grade, trend, recommendations and alerts.
    fn rescore(&self, card: &mut CapabilityScorecard, previous: Option<f64>) {
        for d in Dimension::ALL {
            card.scores.set(d, clamp_unit(card.scores.get(d)));
        }
        card.overall = self.model.overall(&card.scores);
        card.grade = self.model.grade(card.overall);
        card.trend = match previous {
            Some(prev) if card.overall - prev > TREND_BAND => Trend::Improving,
            Some(prev) if prev - card.overall > TREND_BAND => Trend::Declining,
            _ => Trend::Stable,
        };

        card.recommendations.clear();
        card.alerts.clear();
        for d in Dimension::ALL {
            let score = card.scores.get(d);
            if score < self.model.recommendation_threshold {
                card.recommendations.push(format!(
                    "improve {d}: score {score:.2} below {:.2}",
                    self.model.recommendation_threshold
                ));
            }
            if score < self.model.alert_threshold {
                card.alerts.push(format!(
                    "{d} score {score:.2} below alert threshold {:.2}",
                    self.model.alert_threshold
                ));
            }
        }
        if let Some(prev) = previous {
            if prev - card.overall > self.model.overall_drop_alert {
                card.alerts.push(format!(
                    "overall score dropped from {prev:.2} to {:.2}",
                    card.overall
                ));
            }
        }
    }

    /// Set one dimension directly and recompute the derived fields.
    pub async fn update_dimension(
        &self,
        capability_id: &str,
        version: &str,
        dimension: Dimension,
        value: f64,
    ) -> Result<CapabilityScorecard> {
        if !(0.0..=1.0).contains(&value) {
            return Err(CapctlError::InvalidRequest(format!(
                "{dimension} score must be within [0, 1], got {value}"
            )));
        }
        let key = scorecard_key(capability_id, version);
        let card = {
            let mut cards = self.cards.write().await;
            let card = cards
                .get_mut(&key)
                .ok_or_else(|| CapctlError::not_found("scorecard", format!("{capability_id}@{version}")))?;
            card.scores.set(dimension, value);
            let previous = card.history.back().map(|e| e.overall);
            self.rescore(card, previous);
            card.updated_at = Utc::now();
            card.clone()
        };
        self.persist(&card).await?;
        Ok(card)
    }

    /// `(capability_id, version)` pairs whose next evaluation is at or before `now`.
    pub async fn due_for_evaluation(&self, now: DateTime<Utc>) -> Vec<(String, String)> {
        let mut due: Vec<(String, String)> = self
            .cards
            .read()
            .await
            .values()
            .filter(|c| c.next_evaluation <= now)
            .map(|c| (c.capability_id.clone(), c.version.clone()))
            .collect();
        due.sort();
        due
    }

    /// Take a scorecard off the evaluation schedule, keeping its history.
    /// Returns false when it was already retired.
    pub async fn retire(&self, capability_id: &str, version: &str) -> Result<bool> {
        let key = scorecard_key(capability_id, version);
        let mut cards = self.cards.write().await;
        let current = cards
            .get_mut(&key)
            .ok_or_else(|| CapctlError::not_found("scorecard", &key))?;
        if current.next_evaluation == DateTime::<Utc>::MAX_UTC {
            return Ok(false);
        }
        let mut card = current.clone();
        card.next_evaluation = DateTime::<Utc>::MAX_UTC;
        self.persist(&card).await?;
        *current = card;
        debug!(capability_id, version, "scorecard retired from schedule");
        Ok(true)
    }

    /// Drop every scorecard of `capability_id`; returns how many were removed.
    pub async fn remove(&self, capability_id: &str) -> Result<usize> {
        let prefix = format!("scorecard/{capability_id}/");
        let removed: Vec<String> = {
            let mut cards = self.cards.write().await;
            let keys: Vec<String> = cards
                .keys()
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect();
            for k in &keys {
                cards.remove(k);
            }
            keys
        };
        for key in &removed {
            self.store.delete(key).await?;
        }
        Ok(removed.len())
    }

    pub async fn len(&self) -> usize {
        self.cards.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cards.read().await.is_empty()
    }

    pub async fn hydrate(&self) -> Result<usize> {
        let records = self.store.list_by_prefix("scorecard/").await?;
        let mut cards = self.cards.write().await;
        cards.clear();
        for record in records {
            match serde_json::from_value::<CapabilityScorecard>(record.value) {
                Ok(card) => {
                    cards.insert(record.key, card);
                }
                Err(e) => warn!(key = %record.key, error = %e, "skipping unreadable scorecard"),
            }
        }
        Ok(cards.len())
    }

    async fn persist(&self, card: &CapabilityScorecard) -> Result<()> {
        let key = card.store_key();
        if let Err(e) = self.store.put(&key, serde_json::to_value(card)?).await {
            obs::emit_store_error(&key, &e);
            return Err(e.into());
        }
        Ok(())
    }
}
