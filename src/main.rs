use anyhow::{Context, bail};
use chunkbatch::repository::ExecutionRepository;
use chunkbatch::sink::SqlSink;
use chunkbatch::source::DelimitedFileSource;
use chunkbatch::transform::TypedTransform;
use chunkbatch::{
    BatchConfig, BatchStatus, FileExecutionRepository, InMemoryExecutionRepository, JobBuilder,
    StepBuilder,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Employee {
    emp_number: i64,
    emp_name: Option<String>,
    job_title: Option<String>,
    mgr_number: Option<i64>,
    hire_date: Option<String>,
}

fn normalize(mut employee: Employee) -> chunkbatch::Result<Option<Employee>> {
    employee.emp_name = employee.emp_name.map(|n| n.to_uppercase());
    employee.job_title = employee.job_title.map(|t| t.to_uppercase());
    Ok(Some(employee))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/employees.json".to_string());
    let config = BatchConfig::from_file(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    let pool = SqlitePoolOptions::new()
        .max_connections(config.output.max_connections)
        .connect(&config.output.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.output.database_url))?;
    for statement in &config.output.init_statements {
        sqlx::query(statement)
            .execute(&pool)
            .await
            .with_context(|| format!("running init statement: {}", statement))?;
    }

    let mut source = DelimitedFileSource::new(&config.input.resource, config.schema())
        .with_delimiter(config.delimiter_byte())
        .with_encoding(config.input.encoding)
        .with_skip_lines(config.input.skip_lines);
    if let Some(prefix) = &config.input.comment_prefix {
        source = source.with_comment_prefix(prefix.clone());
    }

    let step = StepBuilder::new(&config.step_name)
        .source(source)
        .transform(TypedTransform::new(normalize))
        .sink(SqlSink::new(pool.clone(), config.statement()?))
        .policy(config.policy())
        .build()?;
    let mut job = JobBuilder::new(&config.job_name).step(step).build()?;

    let repository: Box<dyn ExecutionRepository> = match &config.repository.path {
        Some(path) => Box::new(FileExecutionRepository::open(path)?),
        None => Box::new(InMemoryExecutionRepository::new()),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current chunk");
                cancel.cancel();
            }
        });
    }

    let execution = job.run(repository.as_ref(), &cancel).await?;
    pool.close().await;

    info!(
        job = %execution.job_name,
        run_id = execution.run_id,
        status = %execution.status,
        read_count = execution.read_count,
        write_count = execution.write_count,
        skip_count = execution.skip_count,
        "Batch run finished"
    );

    if execution.status != BatchStatus::Completed {
        match &execution.failure {
            Some(failure) => bail!(
                "job {} ended {} at position {}: {:?}: {}",
                execution.job_name,
                execution.status,
                failure.position,
                failure.kind,
                failure.message
            ),
            None => bail!(
                "job {} ended {} at position {}",
                execution.job_name,
                execution.status,
                execution.restart_position
            ),
        }
    }
    Ok(())
}
