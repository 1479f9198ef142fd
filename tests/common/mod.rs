//! Shared fixtures: an in-memory Chinook-like customer table and a scripted oracle

#![allow(dead_code)]

use async_trait::async_trait;
use nl2sql_refiner::backend::SqliteBackend;
use nl2sql_refiner::knowledge_base::KnowledgeStore;
use nl2sql_refiner::llm::{CompletionOptions, CompletionOracle, OracleError};
use nl2sql_refiner::Session;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const CUSTOMERS: &str = "
    CREATE TABLE Customer (
        CustomerId INTEGER PRIMARY KEY NOT NULL,
        FirstName NVARCHAR(40) NOT NULL,
        LastName NVARCHAR(20) NOT NULL,
        Address NVARCHAR(70),
        City NVARCHAR(40),
        State NVARCHAR(40),
        Country NVARCHAR(40),
        Email NVARCHAR(60) NOT NULL
    );
    INSERT INTO Customer VALUES
        (1, 'Luis', 'Goncalves', 'Av. Brigadeiro Faria Lima, 2170', 'Sao Jose dos Campos', 'SP', 'Brazil', 'luisg@embraer.com.br'),
        (2, 'Leonie', 'Kohler', 'Theodor-Heuss-Strasse 34', 'Stuttgart', NULL, 'Germany', 'leonekohler@surfeu.de'),
        (3, 'Francois', 'Tremblay', '1498 rue Belanger', 'Montreal', 'QC', 'Canada', 'ftremblay@gmail.com'),
        (4, 'Bjorn', 'Hansen', 'Ullevalsveien 14', 'Oslo', NULL, 'Norway', 'bjorn.hansen@yahoo.no'),
        (5, 'Helena', 'Holy', 'Rilska 3174/6', 'Prague', NULL, 'Czech Republic', 'hholy@gmail.com');
    CREATE TABLE Invoice (
        InvoiceId INTEGER PRIMARY KEY NOT NULL,
        CustomerId INTEGER NOT NULL,
        Total NUMERIC(10,2) NOT NULL
    );
    INSERT INTO Invoice VALUES (1, 4, 1.98), (2, 5, 3.96), (3, 4, 5.94);
";

pub fn customer_backend() -> SqliteBackend {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend.execute_batch(CUSTOMERS).unwrap();
    backend
}

pub fn session(dir: &Path) -> Arc<Session> {
    Arc::new(Session::new(
        Arc::new(customer_backend()),
        KnowledgeStore::new(dir),
    ))
}

/// Replies in order; once the script runs out every call fails like an unreachable server
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Self::new(&[])
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl CompletionOracle for ScriptedOracle {
    async fn complete(&self, prompt: &str, _options: CompletionOptions) -> Result<String, OracleError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| OracleError::Transport("connection refused".to_string()))
    }
}
