use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use dlm_broker::BrokerState;
use dlm_broker::config::Conf;
use dlm_broker::listener::HttpListenerTask;
use dlm_broker::log::BrokerLog;
use dlm_log::LoggerGuard;
use dlm_task::{ChildTask, ShutdownHandle, ShutdownSignal};
use queue_store::{QueueDb, RepoError};
use tokio::runtime::{self, Runtime};

#[allow(clippy::large_enum_variant)] // `Running` is bigger than `Stopped` but we don't care
enum BrokerRunState {
    Stopped,
    Running {
        shutdown_handle: ShutdownHandle,
        runtime: Runtime,
    },
}

pub struct BrokerService {
    conf: Arc<Conf>,
    state: BrokerRunState,
    _logger_guard: LoggerGuard,
}

impl BrokerService {
    pub fn load(conf: Conf) -> anyhow::Result<Self> {
        let logger_guard =
            dlm_log::init::<BrokerLog>(conf.log_file.as_deref(), &conf.log_filter).context("failed to setup logger")?;

        info!(version = env!("CARGO_PKG_VERSION"));

        if conf.key_generated {
            // Operators need this to configure clients; there is no other way
            // to retrieve it.
            info!(key = %conf.key, "Generated broker key");
        }

        Ok(BrokerService {
            conf: Arc::new(conf),
            state: BrokerRunState::Stopped,
            _logger_guard: logger_guard,
        })
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to create runtime")?;

        // spawn_tasks needs to run in the runtime in order to bind the socket.
        let tasks = runtime.block_on(spawn_tasks(Arc::clone(&self.conf)))?;

        trace!("Tasks created");

        let mut join_all = futures::future::select_all(tasks.inner.into_iter().map(|child| Box::pin(child.join())));

        runtime.spawn(async {
            loop {
                let (result, _, rest) = join_all.await;

                match result {
                    Ok(Ok(())) => trace!("A task terminated gracefully"),
                    Ok(Err(error)) => error!(error = format!("{error:#}"), "A task failed"),
                    Err(error) => error!(%error, "Something went very wrong with a task"),
                }

                if rest.is_empty() {
                    break;
                } else {
                    join_all = futures::future::select_all(rest);
                }
            }
        });

        self.state = BrokerRunState::Running {
            shutdown_handle: tasks.shutdown_handle,
            runtime,
        };

        Ok(())
    }

    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, BrokerRunState::Stopped) {
            BrokerRunState::Stopped => {
                info!("Attempted to stop broker service, but it's already stopped");
            }
            BrokerRunState::Running {
                shutdown_handle,
                runtime,
            } => {
                info!("Stopping broker service");

                shutdown_handle.signal();

                runtime.block_on(async move {
                    tokio::select! {
                        _ = shutdown_handle.all_closed() => {
                            debug!("All tasks closed gracefully");
                        }
                        _ = tokio::time::sleep(Duration::from_secs(10)) => {
                            warn!("Some tasks didn’t terminate in time");
                        }
                    }
                });

                runtime.shutdown_timeout(Duration::from_secs(3));

                self.state = BrokerRunState::Stopped;
            }
        }
    }
}

struct Tasks {
    inner: Vec<ChildTask<anyhow::Result<()>>>,
    shutdown_handle: ShutdownHandle,
    shutdown_signal: ShutdownSignal,
}

impl Tasks {
    fn new() -> Self {
        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

        Self {
            inner: Vec::new(),
            shutdown_handle,
            shutdown_signal,
        }
    }

    fn register<T>(&mut self, task: T)
    where
        T: dlm_task::Task<Output = anyhow::Result<()>> + 'static,
    {
        let child = dlm_task::spawn_task(task, self.shutdown_signal.clone());
        self.inner.push(child);
    }
}

async fn spawn_tasks(conf: Arc<Conf>) -> anyhow::Result<Tasks> {
    let db = QueueDb::open(&conf.db_path)
        .with_context(|| format!("failed to open queue database at {}", conf.db_path))?;
    let db = Arc::new(db);

    match db.create_queue(&conf.default_queue) {
        Ok(meta) => info!(queue = %meta.id, "Created default queue"),
        Err(RepoError::Conflict) => trace!(queue = %conf.default_queue, "Default queue already exists"),
        Err(error) => return Err(error).context("failed to create the default queue"),
    }

    let mut tasks = Tasks::new();

    let state = BrokerState {
        conf: Arc::clone(&conf),
        db,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], conf.port));
    let listener = HttpListenerTask::init_and_bind(addr, state)
        .await
        .context("failed to initialize the HTTP listener")?;
    tasks.register(listener);

    Ok(tasks)
}
