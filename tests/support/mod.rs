//! A recording in-memory backend for driving the repository in tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use entity_repository::{
    Connection, ConnectionProvider, Executor, Field, FromRow, Mapping, Model, RepositoryError,
    Result, Row, Statement,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect(u64),
    Begin(u64),
    Commit(u64),
    Rollback(u64),
    Abandon(u64),
    Release(u64),
    Execute {
        connection: u64,
        statement: Statement,
        timeout: Option<Duration>,
    },
    Fetch {
        connection: u64,
        statement: Statement,
        timeout: Option<Duration>,
    },
}

/// What the next statement sent to the backend returns.
#[derive(Debug, Clone)]
pub enum Reply {
    Affected(u64),
    Rows(Vec<Row>),
    Sets(Vec<Vec<Row>>),
    Fail(String),
}

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    replies: VecDeque<Reply>,
    fail_commit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Recorder {
    state: Arc<Mutex<State>>,
    next_id: Arc<AtomicU64>,
}

impl Recorder {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self::default()
    }

    pub fn provider(&self) -> FakeProvider {
        FakeProvider {
            recorder: self.clone(),
        }
    }

    pub fn reply(&self, reply: Reply) -> &Self {
        self.state.lock().unwrap().replies.push_back(reply);
        self
    }

    pub fn fail_commit(&self) {
        self.state.lock().unwrap().fail_commit = true;
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    /// Every statement sent, executes and fetches alike, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Execute { statement, .. } | Event::Fetch { statement, .. } => {
                    Some(statement)
                }
                _ => None,
            })
            .collect()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|event| matches(event)).count()
    }

    fn record(&self, event: Event) {
        self.state.lock().unwrap().events.push(event);
    }

    fn next_reply(&self) -> Option<Reply> {
        self.state.lock().unwrap().replies.pop_front()
    }
}

pub struct FakeProvider {
    recorder: Recorder,
}

impl ConnectionProvider for FakeProvider {
    type Connection = FakeConnection;

    async fn create_connection(&self) -> Result<FakeConnection> {
        let id = self.recorder.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.record(Event::Connect(id));
        Ok(FakeConnection {
            id,
            recorder: self.recorder.clone(),
        })
    }
}

pub struct FakeConnection {
    id: u64,
    recorder: Recorder,
}

fn backend_error(message: String) -> RepositoryError {
    RepositoryError::provider(std::io::Error::new(std::io::ErrorKind::Other, message))
}

impl Executor for FakeConnection {
    async fn execute(&mut self, statement: &Statement, timeout: Option<Duration>) -> Result<u64> {
        self.recorder.record(Event::Execute {
            connection: self.id,
            statement: statement.clone(),
            timeout,
        });

        match self.recorder.next_reply() {
            None => Ok(1),
            Some(Reply::Affected(rows)) => Ok(rows),
            Some(Reply::Fail(message)) => Err(backend_error(message)),
            Some(other) => panic!("unexpected reply to execute: {:?}", other),
        }
    }

    async fn fetch_all(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<Vec<Row>> {
        self.recorder.record(Event::Fetch {
            connection: self.id,
            statement: statement.clone(),
            timeout,
        });

        match self.recorder.next_reply() {
            None => Ok(Vec::new()),
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Sets(mut sets)) => Ok(if sets.is_empty() {
                Vec::new()
            } else {
                sets.remove(0)
            }),
            Some(Reply::Fail(message)) => Err(backend_error(message)),
            Some(other) => panic!("unexpected reply to fetch: {:?}", other),
        }
    }

    async fn fetch_multiple(
        &mut self,
        statement: &Statement,
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<Row>>> {
        self.recorder.record(Event::Fetch {
            connection: self.id,
            statement: statement.clone(),
            timeout,
        });

        match self.recorder.next_reply() {
            None => Ok(Vec::new()),
            Some(Reply::Rows(rows)) => Ok(vec![rows]),
            Some(Reply::Sets(sets)) => Ok(sets),
            Some(Reply::Fail(message)) => Err(backend_error(message)),
            Some(other) => panic!("unexpected reply to fetch: {:?}", other),
        }
    }
}

impl Connection for FakeConnection {
    async fn begin(&mut self) -> Result<()> {
        self.recorder.record(Event::Begin(self.id));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.recorder.state.lock().unwrap().fail_commit {
            return Err(backend_error("commit refused".to_string()));
        }
        self.recorder.record(Event::Commit(self.id));
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.recorder.record(Event::Rollback(self.id));
        Ok(())
    }

    fn abandon(&mut self) {
        self.recorder.record(Event::Abandon(self.id));
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.recorder.record(Event::Release(self.id));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: i32,
}

impl Person {
    pub fn new(id: i64, name: &str, age: i32) -> Self {
        Self {
            id,
            name: name.to_string(),
            age,
        }
    }

    pub fn row(&self) -> Row {
        Row::new()
            .with("Id", self.id)
            .with("Name", self.name.as_str())
            .with("Age", self.age)
    }
}

impl FromRow for Person {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get("Id")?,
            name: row.get("Name")?,
            age: row.get("Age")?,
        })
    }
}

impl Model for Person {
    fn mapping() -> Mapping<Self> {
        Mapping::new()
            .table("people")
            .field(Field::new("Id", |p: &Person| p.id.into()).key().identity())
            .field(Field::new("Name", |p: &Person| p.name.as_str().into()))
            .field(Field::new("Age", |p: &Person| p.age.into()))
    }
}

/// A key-less model.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub level: String,
    pub message: String,
}

impl FromRow for LogLine {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            level: row.get("Level")?,
            message: row.get("Message")?,
        })
    }
}

impl Model for LogLine {
    fn mapping() -> Mapping<Self> {
        Mapping::new()
            .table("log_lines")
            .field(Field::new("Level", |l: &LogLine| l.level.as_str().into()))
            .field(Field::new("Message", |l: &LogLine| l.message.as_str().into()))
    }
}
