//! Service calls and toggles.

use serde_json::{Map, Value};

use casa_core::ServiceCall;
use casa_core::command::{self, split_service};

use crate::cli::{CallArgs, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

/// How a `casa call` goes out to the hub.
#[derive(Debug)]
enum Outbound {
    /// One entity, no response wanted: the session's command path.
    Entity {
        domain: String,
        service: String,
        entity_id: String,
        data: Map<String, Value>,
    },
    /// Sent as built.
    Raw(ServiceCall),
}

fn build_call(args: &CallArgs) -> Result<Outbound, CliError> {
    let (domain, service) = split_service(&args.service)?;
    let data = util::parse_data(args.data.as_deref())?;

    let mut call = match args.entity {
        Some(ref entity) if !args.return_response => {
            return Ok(Outbound::Entity {
                domain: domain.to_owned(),
                service: service.to_owned(),
                entity_id: entity.clone(),
                data,
            });
        }
        Some(ref entity) => command::entity_call(domain, service, entity, data),
        None => {
            let mut call = ServiceCall::new(domain, service);
            call.service_data = data;
            call
        }
    };
    call.return_response = args.return_response;
    Ok(Outbound::Raw(call))
}

pub async fn call(resolved: &Resolved, args: CallArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let outbound = build_call(&args)?;
    let mut live = util::connect(resolved).await?;
    let id = match outbound {
        Outbound::Entity {
            domain,
            service,
            entity_id,
            data,
        } => {
            live.session
                .dispatch_command(&domain, &service, &entity_id, data)
                .await
        }
        Outbound::Raw(call) => live.session.call_service(call).await,
    };
    let result = live.call_result(id).await;
    live.close().await;
    let payload = result?;

    if args.return_response && !payload.is_null() {
        let compact = matches!(global.output, crate::cli::OutputFormat::JsonCompact);
        output::print_output(&output::render_json(payload.as_ref(), compact)?, global.quiet);
    } else {
        output::print_output(&format!("Called {}", args.service), global.quiet);
    }
    Ok(())
}

/// Toggle using the entity's current state, so covers and scripts get
/// the right service.
pub async fn toggle(resolved: &Resolved, entity_id: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let mut live = util::connect(resolved).await?;

    let result = async {
        live.snapshot().await?;
        let current = live
            .session
            .entity(entity_id)
            .ok_or_else(|| CliError::EntityNotFound {
                entity_id: entity_id.to_owned(),
            })?;
        let planned = command::toggle_call(entity_id, Some(current.as_ref()));
        let label = format!("{}.{}", planned.domain, planned.service);
        let id = live.session.toggle(entity_id).await;
        live.call_result(id).await?;
        Ok::<_, CliError>(label)
    }
    .await;
    live.close().await;

    let label = result?;
    output::print_output(&format!("{entity_id}: {label}"), global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(service: &str, entity: Option<&str>, data: Option<&str>) -> CallArgs {
        CallArgs {
            service: service.into(),
            entity: entity.map(Into::into),
            data: data.map(Into::into),
            return_response: false,
        }
    }

    #[test]
    fn entity_call_goes_through_the_command_path() {
        let outbound = build_call(&args(
            "light.turn_on",
            Some("light.desk"),
            Some(r#"{"brightness_pct": 40}"#),
        ))
        .unwrap();
        let Outbound::Entity {
            domain,
            service,
            entity_id,
            data,
        } = outbound
        else {
            panic!("expected an entity command, got {outbound:?}");
        };
        assert_eq!((domain.as_str(), service.as_str()), ("light", "turn_on"));
        assert_eq!(entity_id, "light.desk");
        assert_eq!(data["brightness_pct"], json!(40));
    }

    #[test]
    fn response_wanted_merges_entity_into_data() {
        let mut wanted = args("weather.get_forecasts", Some("weather.home"), None);
        wanted.return_response = true;
        let Outbound::Raw(call) = build_call(&wanted).unwrap() else {
            panic!("expected a raw call");
        };
        assert_eq!(call.service_data["entity_id"], json!("weather.home"));
        assert!(call.return_response);
    }

    #[test]
    fn call_without_entity() {
        let Outbound::Raw(call) = build_call(&args("homeassistant.reload_all", None, None)).unwrap() else {
            panic!("expected a raw call");
        };
        assert_eq!(call.domain, "homeassistant");
        assert!(call.service_data.is_empty());
        assert!(!call.return_response);
    }

    #[test]
    fn malformed_service_is_usage_error() {
        let err = build_call(&args("reload", None, None)).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::exit_code::USAGE);
    }
}
