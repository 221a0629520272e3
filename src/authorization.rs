// key: authorization -> data table of role/scope rules over a resolved Target
//
// `check` never inspects a loaded row directly; callers resolve a `Target`
// (from the row they already fetched, or from a create request's body) and
// the rule table decides purely from identity + scope. Admin is permitted
// unless an explicit `deny` rule matches first (none are declared today —
// the slot exists so a future policy can add one without reshaping this
// module).
use once_cell::sync::Lazy;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Identity, TokenRole};

/// A request's target, already resolved to the scope IDs that decide
/// ownership. Handlers build one from the row they loaded (or, for
/// creates, from the request body) before calling `check`.
#[derive(Debug, Clone)]
pub enum Target {
    Participant { id: Uuid },
    AgentType,
    Agent { id: Uuid, participant_id: Uuid },
    ServiceType,
    Service {
        id: Uuid,
        agent_id: Uuid,
        agent_participant_id: Uuid,
        consumer_participant_id: Option<Uuid>,
    },
    Job { id: Uuid, agent_id: Uuid },
    VaultSecret { owner_agent_id: Uuid },
    Token,
}

type Matcher = fn(&Identity, &Target) -> bool;

struct Rule {
    role: TokenRole,
    action: &'static str,
    deny: bool,
    matcher: Matcher,
}

fn participant_owns(identity: &Identity, target: &Target) -> bool {
    let Some(pid) = identity.participant_id() else { return false };
    match target {
        Target::Participant { id } => *id == pid,
        Target::Agent { participant_id, .. } => *participant_id == pid,
        Target::Service {
            agent_participant_id,
            consumer_participant_id,
            ..
        } => *agent_participant_id == pid || *consumer_participant_id == Some(pid),
        Target::AgentType | Target::ServiceType => true,
        _ => false,
    }
}

fn agent_owns(identity: &Identity, target: &Target) -> bool {
    let Some(aid) = identity.agent_id() else { return false };
    match target {
        Target::Agent { id, .. } => *id == aid,
        Target::Job { agent_id, .. } => *agent_id == aid,
        Target::Service { agent_id, .. } => *agent_id == aid,
        Target::VaultSecret { owner_agent_id } => *owner_agent_id == aid,
        _ => false,
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule { role: TokenRole::Participant, action: "*", deny: false, matcher: participant_owns },
        Rule { role: TokenRole::Agent, action: "*", deny: false, matcher: agent_owns },
    ]
});

/// Evaluates the rule table for `(identity.role, action, target)`. Admin is
/// permitted whenever no rule matches; non-admin roles need a matching
/// allow rule.
pub fn check(identity: &Identity, action: &str, target: &Target) -> AppResult<()> {
    let hit = RULES
        .iter()
        .find(|r| r.role == identity.role && (r.action == "*" || r.action == action) && (r.matcher)(identity, target));

    match hit {
        Some(rule) if rule.deny => Err(AppError::Forbidden),
        Some(_) => Ok(()),
        None if identity.is_admin() => Ok(()),
        None => Err(AppError::Forbidden),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Identity {
        Identity { role: TokenRole::FulcrumAdmin, scope_id: None }
    }
    fn participant(id: Uuid) -> Identity {
        Identity { role: TokenRole::Participant, scope_id: Some(id) }
    }
    fn agent(id: Uuid) -> Identity {
        Identity { role: TokenRole::Agent, scope_id: Some(id) }
    }

    #[test]
    fn admin_passes_with_no_matching_rule() {
        let a = admin();
        assert!(check(&a, "anything", &Target::Token).is_ok());
    }

    #[test]
    fn participant_permitted_as_provider_or_consumer() {
        let provider = Uuid::now_v7();
        let consumer = Uuid::now_v7();
        let stranger = Uuid::now_v7();
        let target = Target::Service {
            id: Uuid::now_v7(),
            agent_id: Uuid::now_v7(),
            agent_participant_id: provider,
            consumer_participant_id: Some(consumer),
        };
        assert!(check(&participant(provider), "read", &target).is_ok());
        assert!(check(&participant(consumer), "read", &target).is_ok());
        assert!(check(&participant(stranger), "read", &target).is_err());
    }

    #[test]
    fn agent_permitted_only_on_its_own_job_and_service() {
        let aid = Uuid::now_v7();
        let other = Uuid::now_v7();
        let job = Target::Job { id: Uuid::now_v7(), agent_id: aid };
        assert!(check(&agent(aid), "claim", &job).is_ok());
        assert!(check(&agent(other), "claim", &job).is_err());
    }

    #[test]
    fn agent_cannot_manage_participants() {
        let aid = Uuid::now_v7();
        assert!(check(&agent(aid), "create", &Target::Participant { id: Uuid::now_v7() }).is_err());
    }
}
