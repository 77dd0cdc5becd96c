//! Shared helpers for library integration tests.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kiln_lib::events::MemorySink;
use kiln_lib::incremental::TimestampSource;
use kiln_lib::project::{InMemoryProjectLoader, ProjectInstance, TaskInvocation};
use kiln_lib::session::{BuildParameters, BuildSession, HostServices};
use kiln_lib::task::{ParamBag, ParamError, ParamType, ParamValue, Task, TaskError, TaskHost, TaskRegistry, TaskSchema};

/// Upper bound for any single build in these tests; a hang is a failure.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(10);

/// Order in which `Record` tasks ran, by their `Name` parameter.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
  pub fn push(&self, entry: String) {
    self.0.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
  }

  pub fn entries(&self) -> Vec<String> {
    self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn count(&self, entry: &str) -> usize {
    self.entries().iter().filter(|e| *e == entry).count()
  }
}

/// Appends its `Name` to the journal and echoes `Items` back as an output.
struct RecordTask {
  params: ParamBag,
  journal: Journal,
}

#[async_trait]
impl Task for RecordTask {
  fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
    self.params.set(name, value);
    Ok(())
  }

  async fn execute(&mut self, _host: &TaskHost) -> Result<bool, TaskError> {
    self.journal.push(self.params.string("Name").unwrap_or_default());
    Ok(true)
  }

  fn get_parameter(&self, name: &str) -> Option<ParamValue> {
    self.params.get(name).cloned()
  }
}

/// Sleeps for `Millis` milliseconds, then reports `outcome` without logging anything.
struct SleepTask {
  params: ParamBag,
  outcome: bool,
}

#[async_trait]
impl Task for SleepTask {
  fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), ParamError> {
    self.params.set(name, value);
    Ok(())
  }

  async fn execute(&mut self, _host: &TaskHost) -> Result<bool, TaskError> {
    let millis = self
      .params
      .string("Millis")
      .and_then(|m| m.parse::<u64>().ok())
      .unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Ok(self.outcome)
  }

  fn get_parameter(&self, name: &str) -> Option<ParamValue> {
    self.params.get(name).cloned()
  }
}

/// Builtins plus `Record`, `Sleep` and `Fail`.
pub fn registry(journal: &Journal) -> TaskRegistry {
  let mut registry = TaskRegistry::with_builtins();
  let journal = journal.clone();
  registry
    .register(
      TaskSchema::new("Record")
        .required_param("Name", ParamType::String)
        .output_param("Items", ParamType::ItemList),
      move || {
        Box::new(RecordTask {
          params: ParamBag::new(),
          journal: journal.clone(),
        })
      },
    )
    .unwrap();
  registry
    .register(TaskSchema::new("Sleep").param("Millis", ParamType::String), || {
      Box::new(SleepTask {
        params: ParamBag::new(),
        outcome: true,
      })
    })
    .unwrap();
  registry
    .register(TaskSchema::new("Fail").param("Millis", ParamType::String), || {
      Box::new(SleepTask {
        params: ParamBag::new(),
        outcome: false,
      })
    })
    .unwrap();
  registry
}

pub fn record(name: &str) -> TaskInvocation {
  TaskInvocation::new("Record").with_param("Name", name)
}

/// `Record` that also publishes `items` as items of `item_type`.
pub fn produce(name: &str, items: &str, item_type: &str) -> TaskInvocation {
  record(name).with_param("Items", items).output_items("Items", item_type)
}

pub fn message(text: &str) -> TaskInvocation {
  TaskInvocation::new("Message").with_param("Text", text)
}

pub fn error(text: &str) -> TaskInvocation {
  TaskInvocation::new("Error").with_param("Text", text)
}

/// A session over in-memory projects, recording events and task runs.
pub struct Harness {
  pub session: BuildSession,
  pub events: Arc<MemorySink>,
  pub journal: Journal,
  pub loader: Arc<InMemoryProjectLoader>,
}

pub struct HarnessBuilder {
  projects: Vec<ProjectInstance>,
  params: BuildParameters,
  timestamps: Option<Arc<dyn TimestampSource>>,
}

impl HarnessBuilder {
  pub fn project(mut self, project: ProjectInstance) -> Self {
    self.projects.push(project);
    self
  }

  pub fn params(mut self, f: impl FnOnce(&mut BuildParameters)) -> Self {
    f(&mut self.params);
    self
  }

  pub fn timestamps(mut self, timestamps: Arc<dyn TimestampSource>) -> Self {
    self.timestamps = Some(timestamps);
    self
  }

  pub fn start(self) -> Harness {
    let loader = Arc::new(
      self
        .projects
        .into_iter()
        .fold(InMemoryProjectLoader::new(), InMemoryProjectLoader::with_project),
    );
    let events = Arc::new(MemorySink::new());
    let journal = Journal::default();
    let mut services = HostServices::new(loader.clone())
      .with_registry(registry(&journal))
      .with_sink(events.clone());
    if let Some(timestamps) = self.timestamps {
      services = services.with_timestamps(timestamps);
    }
    let session = BuildSession::begin(self.params, services).unwrap();
    Harness {
      session,
      events,
      journal,
      loader,
    }
  }
}

impl Harness {
  pub fn builder() -> HarnessBuilder {
    HarnessBuilder {
      projects: Vec::new(),
      params: BuildParameters {
        max_workers: 4,
        ..Default::default()
      },
      timestamps: None,
    }
  }
}
