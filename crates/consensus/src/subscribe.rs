//! Mirror-backed topic subscriptions.
//!
//! One dispatch task per subscribed topic. The task replays from the
//! requested start time, follows pagination links, and hands each message to
//! the handler exactly once, in consensus order. The sequence number is the
//! delivery cursor; a page that replays an already-seen sequence is skipped.

use crate::mirror::MirrorClient;
use renderhive_api::consensus::TopicHandler;
use renderhive_types::app::{AccountAddress, ConsensusTimestamp};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const PAGE_LIMIT: u32 = 100;

pub(crate) fn spawn_subscription(
    mirror: MirrorClient,
    topic: AccountAddress,
    start_time: ConsensusTimestamp,
    handler: TopicHandler,
    poll_interval: Duration,
    mut quit: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // `gt:` filtering excludes the timestamp itself; stepping back one
        // nanosecond makes the replay inclusive of `start_time`. Genesis
        // replay omits the filter entirely.
        let mut cursor = if start_time == ConsensusTimestamp::GENESIS {
            None
        } else if start_time.nanos == 0 {
            Some(ConsensusTimestamp::new(start_time.seconds - 1, 999_999_999))
        } else {
            Some(ConsensusTimestamp::new(
                start_time.seconds,
                start_time.nanos - 1,
            ))
        };
        let mut last_sequence: u64 = 0;

        tracing::debug!(target: "consensus", %topic, %start_time, "subscription started");

        'outer: loop {
            let mut next_link: Option<String> = None;
            loop {
                if *quit.borrow() {
                    break 'outer;
                }
                let page = match mirror
                    .topic_messages(&topic, PAGE_LIMIT, true, cursor, next_link.take())
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::warn!(target: "consensus", %topic, error = %e, "topic poll failed");
                        break;
                    }
                };
                if page.messages.is_empty() {
                    break;
                }
                for message in page.messages {
                    if message.sequence_number <= last_sequence {
                        continue;
                    }
                    last_sequence = message.sequence_number;
                    cursor = Some(message.consensus_timestamp);
                    handler(message);
                }
                match page.next {
                    Some(link) => next_link = Some(link),
                    None => break,
                }
            }

            tokio::select! {
                _ = quit.changed() => {
                    if *quit.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        tracing::debug!(target: "consensus", %topic, "subscription stopped");
    })
}
