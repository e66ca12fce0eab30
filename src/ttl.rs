//! `TTLParser` (spec §4.3): turns a millisecond TTL header value into a
//! deadline layered on a base [`Context`].

use tokio::time::{Duration, Instant};

use crate::context::{CancelGuard, Context};
use crate::error::ErrorStatus;

/// Whether the caller is making a unary (deadline-required) or oneway
/// (deadline-optional) call; this is the only thing that changes how a
/// missing TTL string is treated (spec §4.3 / §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Unary,
    Oneway,
}

/// Parse `ttl` (the raw `Context-TTL-MS` header value, if present) against
/// `base_ctx`, producing a child context with a deadline, a cancel guard
/// (always callable, even on the error paths), and the parsed value on
/// success.
///
/// `service`/`procedure` are only used to build the error message.
pub fn parse_ttl(
    base_ctx: &Context,
    kind: CallKind,
    ttl: Option<&str>,
    service: &str,
    procedure: &str,
) -> (Context, CancelGuard, Result<(), ErrorStatus>) {
    let ttl = match ttl {
        Some(v) => v,
        None => {
            return match kind {
                CallKind::Oneway => {
                    let (ctx, guard) = (base_ctx.clone(), CancelGuard::noop());
                    (ctx, guard, Ok(()))
                }
                CallKind::Unary => (
                    base_ctx.clone(),
                    CancelGuard::noop(),
                    Err(ErrorStatus::invalid_argument(format!(
                        "invalid TTL \"\" for procedure \"{procedure}\" of service \"{service}\": must be positive integer"
                    ))),
                ),
            };
        }
    };

    let millis: i64 = match ttl.parse() {
        Ok(v) => v,
        Err(_) => {
            return invalid(base_ctx, ttl, service, procedure);
        }
    };

    if millis <= 0 {
        return invalid(base_ctx, ttl, service, procedure);
    }

    let deadline = Instant::now() + Duration::from_millis(millis as u64);
    let (ctx, guard) = base_ctx.with_deadline(deadline);
    (ctx, guard, Ok(()))
}

fn invalid(
    base_ctx: &Context,
    raw: &str,
    service: &str,
    procedure: &str,
) -> (Context, CancelGuard, Result<(), ErrorStatus>) {
    (
        base_ctx.clone(),
        CancelGuard::noop(),
        Err(ErrorStatus::invalid_argument(format!(
            "invalid TTL \"{raw}\" for procedure \"{procedure}\" of service \"{service}\": must be positive integer"
        ))),
    )
}
