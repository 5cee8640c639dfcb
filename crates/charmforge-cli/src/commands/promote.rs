//! Promote command.

use anyhow::{Context, Result};
use charmforge_config::CharmEnv;
use charmforge_config::manifest::{load_bundle_list, load_charm_list};
use charmforge_core::{Channel, TagFilter};
use charmforge_pipeline::{Promoter, PromotionReport, PromotionState, RunOutcome};
use std::path::Path;
use std::process::ExitCode;

use super::{exit_code, toolchain};

/// Promote every entry of `list` matching `tags` from `from` to `to`.
pub async fn run(
    list: &Path,
    tags: &[String],
    from: &str,
    to: &str,
    bundles: bool,
) -> Result<ExitCode> {
    let filter = TagFilter::new(tags.iter().flat_map(|t| t.split(',')));
    let (from, to) = (Channel::new(from), Channel::new(to));
    // Promotion only talks to the store; the build directories are optional.
    let tool_env = CharmEnv::from_env()
        .map(|env| env.tool_env())
        .unwrap_or_default();
    let tools = toolchain(tool_env)?;
    let promoter = Promoter::new(&tools);

    println!("Promoting '{}' from {} to {}", filter, from, to);
    let reports = if bundles {
        let entries = load_bundle_list(list)
            .with_context(|| format!("Failed to load bundle list: {}", list.display()))?;
        promoter.promote_all(&entries, &filter, &from, &to).await
    } else {
        let entries = load_charm_list(list)
            .with_context(|| format!("Failed to load charm list: {}", list.display()))?;
        promoter.promote_all(&entries, &filter, &from, &to).await
    };

    for report in &reports {
        match &report.state {
            PromotionState::Released { id, resources } if resources.is_empty() => {
                println!("✓ {} released to {}", id, report.to);
            }
            PromotionState::Released { id, resources } => {
                println!("✓ {} released to {} with {}", id, report.to, resources.join(", "));
            }
            PromotionState::Failed { message } => {
                println!("✗ {} failed: {}", report.entity, message);
            }
            PromotionState::Skipped { reason } => {
                println!("⊘ {} skipped: {}", report.entity, reason);
            }
        }
    }

    let outcome = promotion_outcome(&reports);
    println!("\nOverall: {}", outcome);
    Ok(exit_code(outcome))
}

fn promotion_outcome(reports: &[PromotionReport]) -> RunOutcome {
    let failed = reports.iter().filter(|r| r.is_failure()).count();
    match failed {
        0 => RunOutcome::Succeeded,
        n if n == reports.len() => RunOutcome::Failed,
        _ => RunOutcome::PartiallySucceeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charmforge_core::Entity;

    fn report(state: PromotionState) -> PromotionReport {
        PromotionReport {
            entity: Entity::new("ns", "etcd"),
            from: Channel::unpublished(),
            to: Channel::edge(),
            state,
        }
    }

    #[test]
    fn test_promotion_outcome() {
        let released = || {
            report(PromotionState::Released {
                id: "cs:~ns/etcd-1".to_string(),
                resources: Vec::new(),
            })
        };
        let failed = || {
            report(PromotionState::Failed {
                message: "denied".to_string(),
            })
        };

        assert_eq!(promotion_outcome(&[]), RunOutcome::Succeeded);
        assert_eq!(promotion_outcome(&[released()]), RunOutcome::Succeeded);
        assert_eq!(promotion_outcome(&[failed()]), RunOutcome::Failed);
        assert_eq!(
            promotion_outcome(&[released(), failed()]),
            RunOutcome::PartiallySucceeded
        );
    }
}
