//! Chain publishing
//!
//! Publishes the segments of a thread chain one after another through the
//! publish pipeline. Each published segment becomes the reply parent of the
//! next one, and the first failure stops the chain.

use std::sync::Arc;

use super::events::{Event, EventBus};
use crate::accounts::SessionAccounts;
use crate::error::{Result, ThreadcastError};
use crate::platforms::PublishedPost;
use crate::publish::PublishPipeline;
use crate::thread_chain::{Segment, ThreadChain};
use crate::types::{ExternalAccount, Platform};

/// Outcome of publishing one chain to one platform
#[derive(Debug)]
pub struct ChainReport {
    pub platform: Platform,
    /// Segments that were submitted, blank ones excluded
    pub total: usize,
    pub published: Vec<PublishedPost>,
    /// The error that stopped the chain, if any
    pub failure: Option<ThreadcastError>,
}

impl ChainReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.published.len() == self.total
    }

    /// Remote id of the first segment
    pub fn root_id(&self) -> Option<&str> {
        self.published.first().map(|p| p.id.as_str())
    }
}

#[derive(Clone)]
pub struct PublishService {
    pipeline: Arc<PublishPipeline>,
    event_bus: EventBus,
}

impl PublishService {
    pub fn new(pipeline: Arc<PublishPipeline>, event_bus: EventBus) -> Self {
        Self {
            pipeline,
            event_bus,
        }
    }

    /// Publish `segments` to the session's account on `platform`.
    ///
    /// Blank segments are skipped. Errors that prevent the chain from starting
    /// (no connected account, nothing to publish) are returned as `Err`;
    /// failures part-way through are reported in the [`ChainReport`].
    pub async fn publish_chain(
        &self,
        session: &mut SessionAccounts,
        platform: Platform,
        segments: &[Segment],
    ) -> Result<ChainReport> {
        let mut account = session.require(platform)?.clone();
        let segments: Vec<&Segment> = segments.iter().filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(ThreadcastError::InvalidInput(
                "The thread chain has no content to publish".to_string(),
            ));
        }

        let total = segments.len();
        self.event_bus.emit(Event::ChainStarted {
            platform,
            segments: total,
        });
        tracing::info!(%platform, segments = total, "Publishing thread chain");

        let mut published: Vec<PublishedPost> = Vec::with_capacity(total);
        let mut failure = None;

        for (index, segment) in segments.into_iter().enumerate() {
            let mut payload = segment.to_payload();
            payload.reply_to = published.last().map(|p| p.id.clone());

            match self.pipeline.publish(&account, payload).await {
                Ok(outcome) => {
                    self.event_bus.emit(Event::SegmentPublished {
                        platform,
                        index,
                        post_id: outcome.post.id.clone(),
                    });
                    account = outcome.account;
                    session.update(account.clone());
                    published.push(outcome.post);
                }
                Err(e) => {
                    tracing::warn!(%platform, index, "Chain stopped: {}", e);
                    self.event_bus.emit(Event::SegmentFailed {
                        platform,
                        index,
                        error: e.to_string(),
                    });
                    if e.requires_reconnect() {
                        self.event_bus.emit(Event::AccountDeactivated {
                            platform,
                            account_id: account.id.clone(),
                        });
                        session.update(ExternalAccount {
                            is_active: false,
                            ..account.clone()
                        });
                    }
                    failure = Some(e);
                    break;
                }
            }
        }

        self.event_bus.emit(Event::ChainCompleted {
            platform,
            published: published.len(),
            total,
        });

        Ok(ChainReport {
            platform,
            total,
            published,
            failure,
        })
    }

    /// Publish `chain` to each of its active platforms in turn
    pub async fn publish_thread_chain(
        &self,
        session: &mut SessionAccounts,
        chain: &ThreadChain,
    ) -> Vec<Result<ChainReport>> {
        let mut reports = Vec::new();
        for platform in chain.active_platforms() {
            let report = self
                .publish_chain(session, platform, chain.platform_segments(platform))
                .await;
            reports.push(report);
        }
        reports
    }
}
