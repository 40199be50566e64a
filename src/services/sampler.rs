//! Model-sampling client.
//!
//! Sends the same chat request to a backend a fixed number of times and
//! tallies which model family answered. Every iteration is isolated: a
//! failed call is printed and counted under `error`, and the loop moves on.

use crate::config::SamplerSettings;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Prefix rules, checked in order. The first match names the bucket.
const FAMILY_PREFIXES: [&str; 2] = ["gpt-4.1", "gpt-4o"];

const UNKNOWN_MODEL: &str = "unknown";

/// Bucket a single response falls into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
    Family(&'static str),
    Other,
    Error,
}

impl Bucket {
    pub fn label(self) -> &'static str {
        match self {
            Self::Family(name) => name,
            Self::Other => "other",
            Self::Error => "error",
        }
    }
}

pub fn classify(model: &str) -> Bucket {
    FAMILY_PREFIXES
        .into_iter()
        .find(|prefix| model.starts_with(prefix))
        .map_or(Bucket::Other, Bucket::Family)
}

/// Per-bucket counts in first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    counts: Vec<(&'static str, usize)>,
}

impl Tally {
    pub fn record(&mut self, bucket: Bucket) {
        let label = bucket.label();
        match self.counts.iter_mut().find(|(name, _)| *name == label) {
            Some((_, count)) => *count += 1,
            None => self.counts.push((label, 1)),
        }
    }

    #[cfg(test)]
    pub fn get(&self, label: &str) -> usize {
        self.counts
            .iter()
            .find(|(name, _)| *name == label)
            .map_or(0, |(_, count)| *count)
    }

    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, count)| count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.counts.iter().copied()
    }
}

#[derive(Serialize)]
struct ChatProbe<'a> {
    message: &'a str,
}

/// A missing `model` reads as `unknown`; an explicit `null` fails to decode
/// and is counted as an error.
#[derive(Deserialize)]
struct ChatReply {
    #[serde(default = "unknown_model")]
    model: String,
}

fn unknown_model() -> String {
    UNKNOWN_MODEL.to_string()
}

pub struct ModelSampler {
    client: reqwest::Client,
    settings: SamplerSettings,
}

impl ModelSampler {
    pub fn new(settings: SamplerSettings) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    /// One request. Returns the reported model, or `unknown` if the field is absent.
    pub async fn probe(&self) -> reqwest::Result<String> {
        let reply: ChatReply = self
            .client
            .post(&self.settings.url)
            .json(&ChatProbe {
                message: &self.settings.message,
            })
            .send()
            .await?
            .json()
            .await?;
        Ok(reply.model)
    }

    /// Run every iteration, printing a line per response and a final summary.
    pub async fn run(&self, out: &mut impl Write) -> io::Result<Tally> {
        let mut tally = Tally::default();

        for i in 1..=self.settings.count {
            match self.probe().await {
                Ok(model) => {
                    tally.record(classify(&model));
                    writeln!(out, "{}. {}", i, model)?;
                }
                Err(err) => {
                    tally.record(Bucket::Error);
                    writeln!(out, "{}. Error: {}", i, err)?;
                }
            }
            tokio::time::sleep(self.settings.delay).await;
        }

        writeln!(out, "\n=== Final Counts ===")?;
        for (label, count) in tally.iter() {
            writeln!(out, "{}: {}", label, count)?;
        }
        Ok(tally)
    }
}
