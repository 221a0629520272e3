// key: core-data-model
// Entity shapes shared across the schema engine, lifecycle engine, job queue
// and HTTP handlers. Mirrors the DATA MODEL section of the service spec.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "agent_connectivity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    New,
    Connected,
    Disconnected,
    Error,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "token_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TokenRole {
    FulcrumAdmin,
    Participant,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub status: ParticipantStatus,
    pub country_code: Option<String>,
    pub attributes: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentType {
    pub id: Uuid,
    pub name: String,
    pub configuration_schema: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub participant_id: Uuid,
    pub agent_type_id: Uuid,
    pub connectivity: Connectivity,
    pub token_hash: String,
    pub tags: Vec<String>,
    pub configuration: Value,
    pub service_pool_set_id: Option<Uuid>,
    pub last_status_update_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceType {
    pub id: Uuid,
    pub name: String,
    pub property_schema: Value,
    pub lifecycle_schema: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub service_type_id: Uuid,
    pub agent_id: Uuid,
    pub group_id: Option<Uuid>,
    pub consumer_participant_id: Option<Uuid>,
    pub status: String,
    pub properties: Value,
    pub attributes: Value,
    pub agent_instance_data: Value,
    pub failed_action: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceGroup {
    pub id: Uuid,
    pub name: String,
    pub consumer_participant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub service_id: Uuid,
    pub agent_id: Uuid,
    pub action: String,
    pub state: JobState,
    pub priority: i32,
    pub params: Value,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Token {
    pub id: Uuid,
    pub role: TokenRole,
    pub hashed_value: String,
    pub scope_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pool_generator_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PoolGeneratorKind {
    List,
    Subnet,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceOption {
    pub id: Uuid,
    pub participant_id: Uuid,
    pub option_type: String,
    pub value: Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServicePoolSet {
    pub id: Uuid,
    pub name: String,
    pub participant_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServicePool {
    pub id: Uuid,
    pub pool_set_id: Uuid,
    #[sqlx(rename = "pool_type")]
    pub pool_type: String,
    pub property_type: String,
    pub generator_kind: PoolGeneratorKind,
    pub generator_config: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServicePoolValue {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub value: Value,
    pub service_id: Option<Uuid>,
    pub property_name: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
}

/// Authenticated identity resolved from a bearer token, carried through every
/// handler and into the authorization evaluator.
#[derive(Debug, Clone)]
pub struct Identity {
    pub role: TokenRole,
    pub scope_id: Option<Uuid>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, TokenRole::FulcrumAdmin)
    }

    pub fn participant_id(&self) -> Option<Uuid> {
        match self.role {
            TokenRole::Participant => self.scope_id,
            _ => None,
        }
    }

    pub fn agent_id(&self) -> Option<Uuid> {
        match self.role {
            TokenRole::Agent => self.scope_id,
            _ => None,
        }
    }
}
