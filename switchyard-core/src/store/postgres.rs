use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use switchyard_model::{
    HostRegistration, Job, JobId, JobSignature, JobStatus, ServiceKey,
    ServiceRegistration,
};
use uuid::Uuid;

use crate::error::{RegistryError, Result};

use super::{JobFilter, JobStore, Page, RegistrationStore};

const JOB_COLUMNS: &str = r#"
    id, version, job_type, operation, arguments, payload, status,
    failure_reason, dispatchable, job_load, creator, organization,
    created_host, processor_host, parent_job, root_job, date_created,
    date_started, date_completed, queue_time_ms, run_time_ms
"#;

const SERVICE_COLUMNS: &str = r#"
    service_type, host, path, online, active, maintenance_mode, job_producer,
    online_from, state, state_changed, warning_state_trigger,
    error_state_trigger
"#;

const HOST_COLUMNS: &str = r#"
    base_url, ip_address, node_name, memory, cores, max_load, online, active,
    maintenance_mode
"#;

/// Postgres-backed job and registration store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        crate::MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| RegistryError::Internal(format!("Failed to run migrations: {e}")))?;
        Ok(Self::new(pool))
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_job(row: &PgRow) -> Result<Job> {
        let status: String = row.try_get("status")?;
        let failure_reason: String = row.try_get("failure_reason")?;
        Ok(Job {
            id: JobId(row.try_get::<Uuid, _>("id")?),
            version: row.try_get("version")?,
            job_type: row.try_get("job_type")?,
            operation: row.try_get("operation")?,
            arguments: row.try_get("arguments")?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            failure_reason: failure_reason.parse()?,
            dispatchable: row.try_get("dispatchable")?,
            job_load: row.try_get("job_load")?,
            creator: row.try_get("creator")?,
            organization: row.try_get("organization")?,
            created_host: row.try_get("created_host")?,
            processor_host: row.try_get("processor_host")?,
            parent_job: row.try_get::<Option<Uuid>, _>("parent_job")?.map(JobId),
            root_job: row.try_get::<Option<Uuid>, _>("root_job")?.map(JobId),
            date_created: row.try_get("date_created")?,
            date_started: row.try_get("date_started")?,
            date_completed: row.try_get("date_completed")?,
            queue_time_ms: row.try_get("queue_time_ms")?,
            run_time_ms: row.try_get("run_time_ms")?,
        })
    }

    fn map_host(row: &PgRow) -> Result<HostRegistration> {
        Ok(HostRegistration {
            base_url: row.try_get("base_url")?,
            ip_address: row.try_get("ip_address")?,
            node_name: row.try_get("node_name")?,
            memory: row.try_get::<i64, _>("memory")?.max(0) as u64,
            cores: row.try_get::<i32, _>("cores")?.max(0) as u32,
            max_load: row.try_get("max_load")?,
            online: row.try_get("online")?,
            active: row.try_get("active")?,
            maintenance_mode: row.try_get("maintenance_mode")?,
        })
    }

    fn map_service(row: &PgRow) -> Result<ServiceRegistration> {
        let state: String = row.try_get("state")?;
        Ok(ServiceRegistration {
            service_type: row.try_get("service_type")?,
            host: row.try_get("host")?,
            path: row.try_get("path")?,
            online: row.try_get("online")?,
            active: row.try_get("active")?,
            maintenance_mode: row.try_get("maintenance_mode")?,
            job_producer: row.try_get("job_producer")?,
            online_from: row.try_get("online_from")?,
            state: state.parse()?,
            state_changed: row.try_get("state_changed")?,
            warning_state_trigger: row
                .try_get::<Option<String>, _>("warning_state_trigger")?
                .map(JobSignature),
            error_state_trigger: row
                .try_get::<Option<String>, _>("error_state_trigger")?
                .map(JobSignature),
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &JobFilter) {
        builder.push(" WHERE 1=1");
        if let Some(ids) = &filter.ids {
            let ids: Vec<Uuid> = ids.iter().map(JobId::to_uuid).collect();
            builder.push(" AND id = ANY(");
            builder.push_bind(ids);
            builder.push(")");
        }
        if !filter.statuses.is_empty() {
            let statuses: Vec<String> =
                filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
            builder.push(" AND status = ANY(");
            builder.push_bind(statuses);
            builder.push(")");
        }
        if let Some(job_type) = &filter.job_type {
            builder.push(" AND job_type = ");
            builder.push_bind(job_type.clone());
        }
        if let Some(operation) = &filter.operation {
            builder.push(" AND operation = ");
            builder.push_bind(operation.clone());
        }
        if let Some(host) = &filter.processor_host {
            builder.push(" AND processor_host = ");
            builder.push_bind(host.clone());
        }
        if let Some(parent) = filter.parent_job {
            builder.push(" AND parent_job = ");
            builder.push_bind(parent.to_uuid());
        }
        if filter.parentless {
            builder.push(" AND parent_job IS NULL");
        }
        if let Some(dispatchable) = filter.dispatchable {
            builder.push(" AND dispatchable = ");
            builder.push_bind(dispatchable);
        }
        if let Some(after) = filter.completed_after {
            builder.push(" AND date_completed >= ");
            builder.push_bind(after);
        }
        if let Some(before) = filter.completed_before {
            builder.push(" AND date_completed < ");
            builder.push_bind(before);
        }
    }

    fn push_page(builder: &mut QueryBuilder<'_, Postgres>, page: Page) {
        if let Some(limit) = page.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }
        builder.push(" OFFSET ");
        builder.push_bind(page.offset as i64);
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn create(&self, mut job: Job) -> Result<Job> {
        job.version = 1;
        sqlx::query(&format!(
            r#"
            INSERT INTO jobs ({JOB_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21)
            "#
        ))
        .bind(job.id.to_uuid())
        .bind(job.version)
        .bind(&job.job_type)
        .bind(&job.operation)
        .bind(&job.arguments)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.failure_reason.as_str())
        .bind(job.dispatchable)
        .bind(job.job_load)
        .bind(&job.creator)
        .bind(&job.organization)
        .bind(&job.created_host)
        .bind(&job.processor_host)
        .bind(job.parent_job.map(|id| id.to_uuid()))
        .bind(job.root_job.map(|id| id.to_uuid()))
        .bind(job.date_created)
        .bind(job.date_started)
        .bind(job.date_completed)
        .bind(job.queue_time_ms)
        .bind(job.run_time_ms)
        .execute(self.pool())
        .await?;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id.to_uuid())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| RegistryError::not_found(format!("job {id}")))?;
        Self::map_job(&row)
    }

    async fn update(&self, job: &Job) -> Result<Job> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs SET
                version = version + 1,
                payload = $3,
                status = $4,
                failure_reason = $5,
                dispatchable = $6,
                job_load = $7,
                processor_host = $8,
                date_started = $9,
                date_completed = $10,
                queue_time_ms = $11,
                run_time_ms = $12,
                arguments = $13
            WHERE id = $1 AND version = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id.to_uuid())
        .bind(job.version)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.failure_reason.as_str())
        .bind(job.dispatchable)
        .bind(job.job_load)
        .bind(&job.processor_host)
        .bind(job.date_started)
        .bind(job.date_completed)
        .bind(job.queue_time_ms)
        .bind(job.run_time_ms)
        .bind(&job.arguments)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Self::map_job(&row),
            None => {
                // Distinguish a missing row from a lost race.
                self.get(job.id).await?;
                Err(RegistryError::Conflict {
                    id: job.id,
                    expected: job.version,
                })
            }
        }
    }

    async fn delete(&self, ids: &[JobId]) -> Result<u64> {
        let ids: Vec<Uuid> = ids.iter().map(JobId::to_uuid).collect();
        let result = sqlx::query("DELETE FROM jobs WHERE id = ANY($1)")
            .bind(ids)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn find(&self, filter: &JobFilter, page: Page) -> Result<Vec<Job>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
        Self::push_filter(&mut builder, filter);
        builder.push(" ORDER BY date_created, id");
        Self::push_page(&mut builder, page);
        let rows = builder.build().fetch_all(self.pool()).await?;
        rows.iter().map(Self::map_job).collect()
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM jobs");
        Self::push_filter(&mut builder, filter);
        let count: i64 = builder.build().fetch_one(self.pool()).await?.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn descendants(&self, id: JobId, page: Page) -> Result<Vec<Job>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            r#"
            WITH RECURSIVE tree (id, depth) AS (
                SELECT id, 1 FROM jobs WHERE parent_job = "#,
        );
        builder.push_bind(id.to_uuid());
        builder.push(format!(
            r#"
                UNION ALL
                SELECT j.id, t.depth + 1
                FROM jobs j JOIN tree t ON j.parent_job = t.id
            )
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE id IN (SELECT id FROM tree)
            ORDER BY (SELECT MIN(depth) FROM tree WHERE tree.id = jobs.id),
                     date_created, id
            "#
        ));
        Self::push_page(&mut builder, page);
        let rows = builder.build().fetch_all(self.pool()).await?;
        rows.iter().map(Self::map_job).collect()
    }

    async fn host_loads(
        &self,
        statuses: &[JobStatus],
        excluded_type: &str,
    ) -> Result<HashMap<String, f32>> {
        let statuses: Vec<String> =
            statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            r#"
            SELECT processor_host, SUM(job_load)::REAL AS load
            FROM jobs
            WHERE status = ANY($1)
              AND job_type <> $2
              AND processor_host IS NOT NULL
            GROUP BY processor_host
            "#,
        )
        .bind(statuses)
        .bind(excluded_type)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| -> Result<(String, f32)> {
                Ok((row.try_get("processor_host")?, row.try_get("load")?))
            })
            .collect()
    }
}

#[async_trait]
impl RegistrationStore for PostgresStore {
    async fn host(&self, base_url: &str) -> Result<Option<HostRegistration>> {
        let row = sqlx::query(&format!(
            "SELECT {HOST_COLUMNS} FROM hosts WHERE base_url = $1"
        ))
        .bind(base_url)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(Self::map_host).transpose()
    }

    async fn hosts(&self) -> Result<Vec<HostRegistration>> {
        let rows = sqlx::query(&format!(
            "SELECT {HOST_COLUMNS} FROM hosts ORDER BY base_url"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(Self::map_host).collect()
    }

    async fn save_host(&self, host: &HostRegistration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hosts (base_url, ip_address, node_name, memory, cores,
                               max_load, online, active, maintenance_mode)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (base_url) DO UPDATE SET
                ip_address = EXCLUDED.ip_address,
                node_name = EXCLUDED.node_name,
                memory = EXCLUDED.memory,
                cores = EXCLUDED.cores,
                max_load = EXCLUDED.max_load,
                online = EXCLUDED.online,
                active = EXCLUDED.active,
                maintenance_mode = EXCLUDED.maintenance_mode
            "#,
        )
        .bind(&host.base_url)
        .bind(&host.ip_address)
        .bind(&host.node_name)
        .bind(i64::try_from(host.memory).unwrap_or(i64::MAX))
        .bind(i32::try_from(host.cores).unwrap_or(i32::MAX))
        .bind(host.max_load)
        .bind(host.online)
        .bind(host.active)
        .bind(host.maintenance_mode)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn service(
        &self,
        key: &ServiceKey,
    ) -> Result<Option<ServiceRegistration>> {
        let row = sqlx::query(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE service_type = $1 AND host = $2"
        ))
        .bind(&key.service_type)
        .bind(&key.host)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(Self::map_service).transpose()
    }

    async fn services(&self) -> Result<Vec<ServiceRegistration>> {
        let rows = sqlx::query(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services ORDER BY service_type, host"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(Self::map_service).collect()
    }

    async fn save_service(&self, service: &ServiceRegistration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO services (service_type, host, path, online, active,
                                  maintenance_mode, job_producer, online_from,
                                  state, state_changed, warning_state_trigger,
                                  error_state_trigger)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (service_type, host) DO UPDATE SET
                path = EXCLUDED.path,
                online = EXCLUDED.online,
                active = EXCLUDED.active,
                maintenance_mode = EXCLUDED.maintenance_mode,
                job_producer = EXCLUDED.job_producer,
                online_from = EXCLUDED.online_from,
                state = EXCLUDED.state,
                state_changed = EXCLUDED.state_changed,
                warning_state_trigger = EXCLUDED.warning_state_trigger,
                error_state_trigger = EXCLUDED.error_state_trigger
            "#,
        )
        .bind(&service.service_type)
        .bind(&service.host)
        .bind(&service.path)
        .bind(service.online)
        .bind(service.active)
        .bind(service.maintenance_mode)
        .bind(service.job_producer)
        .bind(service.online_from)
        .bind(service.state.as_str())
        .bind(service.state_changed)
        .bind(service.warning_state_trigger.as_ref().map(|s| s.0.clone()))
        .bind(service.error_state_trigger.as_ref().map(|s| s.0.clone()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn services_of_type(
        &self,
        service_type: &str,
    ) -> Result<Vec<ServiceRegistration>> {
        let rows = sqlx::query(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services WHERE service_type = $1 ORDER BY host"
        ))
        .bind(service_type)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(Self::map_service).collect()
    }
}
