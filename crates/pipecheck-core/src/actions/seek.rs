use crate::action::ActionInstance;
use crate::pipeline::SeekParams;
use crate::registry::{ExecResult, Execute};
use crate::report::{IssueId, Report};
use crate::scenario::ExecContext;
use crate::types::{SeekFlags, SeekFormat, SeekType, Seqnum};

pub(crate) struct SeekExec;

impl Execute for SeekExec {
    fn execute(&self, ctx: &mut ExecContext<'_>, action: &mut ActionInstance) -> ExecResult {
        let rate = match action.params.resolve_f64("seek", "rate", ctx.vars) {
            Ok(rate) => rate.unwrap_or(1.0),
            Err(err) => return ctx.fail(action, err.to_string()),
        };
        let start = match action.params.resolve_clocktime("seek", "start", ctx.vars) {
            Ok(Some(start)) => start,
            Ok(None) => return ctx.fail(action, "seek start resolved to no position"),
            Err(err) => return ctx.fail(action, err.to_string()),
        };
        let stop = match action.params.resolve_clocktime("seek", "stop", ctx.vars) {
            Ok(stop) => stop,
            Err(err) => return ctx.fail(action, err.to_string()),
        };
        let flags = match action.params.get_str("flags") {
            None => SeekFlags::default(),
            Some(spec) => match SeekFlags::parse(spec) {
                Some(flags) => flags,
                None => return ctx.fail(action, format!("unknown seek flags '{spec}'")),
            },
        };

        let seek = SeekParams {
            seqnum: Seqnum::next(),
            rate,
            format: SeekFormat::Time,
            flags,
            start_type: SeekType::Set,
            start: Some(start),
            stop_type: if stop.is_some() {
                SeekType::Set
            } else {
                SeekType::None
            },
            stop,
        };
        tracing::info!(
            seqnum = %seek.seqnum,
            start = %start,
            rate,
            flags = %seek.flags,
            "sending seek"
        );
        if !ctx.pipeline.send_seek(&seek) {
            ctx.reporter.report(
                Report::new(
                    IssueId::SeekNotHandled,
                    format!("pipeline refused seek to {start} (rate {rate})"),
                )
                .for_action(action.seq, &action.type_name),
            );
            return ExecResult::ErrorReported;
        }
        ctx.tracker.on_seek_issued(action.seq, seek);
        ExecResult::Async
    }
}
