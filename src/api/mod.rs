// key: http-api -> one module per resource, handlers only ever parse + call into the engines
pub mod agent_types;
pub mod agents;
pub mod health;
pub mod jobs;
pub mod participants;
pub mod service_groups;
pub mod service_options;
pub mod service_pools;
pub mod service_types;
pub mod services;
pub mod vault;
