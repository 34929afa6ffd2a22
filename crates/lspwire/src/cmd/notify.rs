use crate::cmd::session::{Session, SessionSettings};
use crate::cmd::{parse_params, runtime, NotifyArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::output::{print_notified, print_transcript, OutputFormat};

pub fn run(args: NotifyArgs, format: OutputFormat) -> CliResult<i32> {
    let params = parse_params(&args.params)?;
    let settings = SessionSettings::from_args(&args.server)?;
    let verbose = settings.verbose;

    runtime()?.block_on(async move {
        let session = Session::spawn(settings)?;

        let result = match session.initialize().await {
            Ok(_) => session
                .connection()
                .notify(session.interrupt(), &args.method, &params)
                .await
                .map_err(|err| rpc_error(&format!("{} failed", args.method), err)),
            Err(err) => Err(err),
        };

        let transcript = session.transcript().clone();
        session.close().await;

        result?;
        print_notified(&args.method, format);
        if verbose {
            print_transcript(&transcript, format)?;
        }
        Ok(SUCCESS)
    })
}
