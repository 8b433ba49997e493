//! A virtual network of nodes on an in-memory radio medium, described by a toml scenario.
//!
//! ```toml
//! nodes = [1, 2, 3, 4]
//! links = [[1, 2], [2, 3], [3, 4]]
//! message_interval_ms = 1000
//! latency_ms = 50
//!
//! [[messages]]
//! sender = 1
//! receiver = 4
//! text = "hello"
//! ```

use std::{collections::BTreeMap, path::Path, time::Duration};

use log::{info, warn};
use serde::Deserialize;

use crate::{
    address::Address,
    config::{ConfigError, NodeConfig, RoutingConfig},
    network::SendError,
    transport::memory::Medium,
    Node,
};

/// Description of a virtual network, and the messages to send in it.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub nodes: Vec<Address>,
    #[serde(default)]
    pub links: Vec<(Address, Address)>,
    #[serde(default)]
    pub messages: Vec<ScenarioMessage>,
    /// Pause between consecutive messages, in milliseconds.
    #[serde(default = "default_message_interval")]
    pub message_interval_ms: u64,
    /// Time a transmission takes to reach the stations in range, in milliseconds.
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// A message sent during a [`Scenario`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ScenarioMessage {
    pub sender: Address,
    pub receiver: Address,
    /// Text of the message. Defaults to a greeting naming both nodes.
    pub text: Option<String>,
}

impl ScenarioMessage {
    pub fn text(&self) -> String {
        self.text
            .clone()
            .unwrap_or_else(|| format!("Hello from {} to {}", self.sender, self.receiver))
    }
}

fn default_message_interval() -> u64 {
    1_000
}

impl Scenario {
    /// Load a `Scenario` from the toml file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse a `Scenario` from toml text.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let scenario: Scenario = toml::from_str(raw)?;

        for (a, b) in &scenario.links {
            if !scenario.nodes.contains(a) || !scenario.nodes.contains(b) {
                return Err(ConfigError::Invalid("link refers to an unknown node"));
            }
        }
        for message in &scenario.messages {
            if !scenario.nodes.contains(&message.sender)
                || !scenario.nodes.contains(&message.receiver)
            {
                return Err(ConfigError::Invalid("message refers to an unknown node"));
            }
        }
        for node in &scenario.nodes {
            NodeConfig {
                routing: scenario.routing,
                ..NodeConfig::new(*node)
            }
            .validate()?;
        }

        Ok(scenario)
    }
}

/// A running virtual network.
pub struct Simulation {
    medium: Medium,
    nodes: BTreeMap<Address, Node>,
    message_interval: Duration,
    messages: Vec<ScenarioMessage>,
}

impl Simulation {
    /// Start all nodes of `scenario`.
    pub fn new(scenario: Scenario) -> Self {
        let medium = Medium::with_links(scenario.links.iter().copied())
            .with_latency(Duration::from_millis(scenario.latency_ms));
        let nodes: BTreeMap<Address, Node> = scenario
            .nodes
            .iter()
            .map(|address| {
                let config = NodeConfig {
                    routing: scenario.routing,
                    ..NodeConfig::new(*address)
                };
                (*address, Node::new(&config, medium.attach(*address)))
            })
            .collect();

        let messages = scenario
            .messages
            .into_iter()
            .filter(|message| {
                let known = nodes.contains_key(&message.sender);
                if !known {
                    warn!("Skipping message from unknown node {}", message.sender);
                }
                known
            })
            .collect();

        Self {
            medium,
            nodes,
            message_interval: Duration::from_millis(scenario.message_interval_ms),
            messages,
        }
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    pub fn node(&self, address: Address) -> Option<&Node> {
        self.nodes.get(&address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Send the messages of the scenario in order, returning the outcome of each.
    pub async fn run_messages(&self) -> Vec<(ScenarioMessage, Result<(), SendError>)> {
        let mut outcomes = Vec::with_capacity(self.messages.len());

        for (i, message) in self.messages.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.message_interval).await;
            }

            // Senders were checked when the simulation was created.
            let Some(node) = self.nodes.get(&message.sender) else {
                continue;
            };
            info!("Sending message from {} to {}", message.sender, message.receiver);
            let result = node.send_message(&message.text(), message.receiver).await;
            outcomes.push((message.clone(), result));
        }

        outcomes
    }
}
