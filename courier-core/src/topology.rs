//! Queue topology: work queues, their direct exchanges, dead-letter routing
//! and message TTLs, resolved onto broker topics.
//!
//! Every work queue and every dead-letter queue is a topic of the same name.
//! Exchanges only exist as routing-table entries: publishing to
//! `(exchange, routing_key)` resolves to one topic through [`Topology::route`].

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Workload categories that own a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Routing,
    Notification,
    LlmAnalysis,
    ApiUpdate,
    Voting,
}

/// Declaration of one durable work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub category: Category,
    pub queue: &'static str,
    pub exchange: &'static str,
    pub routing_key: &'static str,
    pub ttl: Duration,
}

impl QueueSpec {
    pub fn dead_letter_exchange(&self) -> String {
        format!("{}.dlx", self.exchange)
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dlq", self.queue)
    }

    pub fn dead_letter_routing_key(&self) -> String {
        format!("{}.dlq", self.routing_key)
    }

    /// Queue arguments as a broker with native dead-lettering would declare them.
    pub fn arguments(&self) -> BTreeMap<&'static str, Value> {
        let mut args = BTreeMap::new();
        args.insert("x-dead-letter-exchange", json!(self.dead_letter_exchange()));
        args.insert("x-dead-letter-routing-key", json!(self.dead_letter_routing_key()));
        args.insert("x-message-ttl", json!(self.ttl.as_millis() as u64));
        args
    }
}

pub const VOTING_CONCLUDED_KEY: &str = "votacao.concluida";
pub const VOTE_REGISTERED_KEY: &str = "voto.registrado";

const HOUR: Duration = Duration::from_secs(60 * 60);

pub static QUEUES: [QueueSpec; 5] = [
    QueueSpec {
        category: Category::Routing,
        queue: "parlamd.tramitacao.queue",
        exchange: "parlamd.tramitacao.exchange",
        routing_key: "tramitacao.processar",
        ttl: HOUR,
    },
    QueueSpec {
        category: Category::Notification,
        queue: "parlamd.notificacao.queue",
        exchange: "parlamd.notificacao.exchange",
        routing_key: "notificacao.enviar",
        ttl: Duration::from_secs(2 * 60 * 60),
    },
    QueueSpec {
        category: Category::LlmAnalysis,
        queue: "parlamd.analise.llm.queue",
        exchange: "parlamd.analise.llm.exchange",
        routing_key: "analise.llm.processar",
        ttl: Duration::from_secs(10 * 60),
    },
    QueueSpec {
        category: Category::ApiUpdate,
        queue: "parlamd.atualizacao.api.queue",
        exchange: "parlamd.atualizacao.api.exchange",
        routing_key: "api.atualizar",
        ttl: Duration::from_secs(30 * 60),
    },
    QueueSpec {
        category: Category::Voting,
        queue: "parlamd.votacao.queue",
        exchange: "parlamd.votacao.exchange",
        routing_key: "votacao.processar",
        ttl: HOUR,
    },
];

/// Where a published message lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Work(&'static QueueSpec),
    DeadLetter(&'static QueueSpec),
    /// Output events that no work queue consumes.
    Event(String),
}

impl Route {
    pub fn topic(&self) -> String {
        match self {
            Route::Work(spec) => spec.queue.to_string(),
            Route::DeadLetter(spec) => spec.dead_letter_queue(),
            Route::Event(topic) => topic.clone(),
        }
    }
}

pub struct Topology;

impl Topology {
    pub fn queue(category: Category) -> &'static QueueSpec {
        QUEUES
            .iter()
            .find(|spec| spec.category == category)
            .unwrap_or(&QUEUES[0])
    }

    /// Resolves a direct-exchange publish. `None` means unroutable.
    pub fn route(exchange: &str, routing_key: &str) -> Option<Route> {
        for spec in QUEUES.iter() {
            if exchange == spec.exchange && routing_key == spec.routing_key {
                return Some(Route::Work(spec));
            }
            if exchange == spec.dead_letter_exchange() && routing_key == spec.dead_letter_routing_key() {
                return Some(Route::DeadLetter(spec));
            }
        }

        let voting = Topology::queue(Category::Voting);
        if exchange == voting.exchange
            && (routing_key == VOTING_CONCLUDED_KEY || routing_key == VOTE_REGISTERED_KEY)
        {
            return Some(Route::Event(format!("{}.{}", exchange, routing_key)));
        }

        None
    }

    /// All topics to provision: work queues, dead-letter queues, voting events.
    pub fn topics() -> Vec<String> {
        let mut topics: Vec<String> = QUEUES
            .iter()
            .flat_map(|spec| [spec.queue.to_string(), spec.dead_letter_queue()])
            .collect();
        let voting = Topology::queue(Category::Voting);
        for key in [VOTING_CONCLUDED_KEY, VOTE_REGISTERED_KEY] {
            topics.push(format!("{}.{}", voting.exchange, key));
        }
        topics
    }
}
