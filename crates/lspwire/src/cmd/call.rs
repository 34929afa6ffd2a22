use crate::cmd::session::{Session, SessionSettings};
use crate::cmd::{parse_params, runtime, CallArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::output::{print_result, print_transcript, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let params = parse_params(&args.params)?;
    let settings = SessionSettings::from_args(&args.server)?;
    let verbose = settings.verbose;

    runtime()?.block_on(async move {
        let session = Session::spawn(settings)?;

        let result = match session.initialize().await {
            Ok(_) => session
                .connection()
                .call(session.interrupt(), &args.method, &params)
                .await
                .map_err(|err| rpc_error(&format!("{} failed", args.method), err)),
            Err(err) => Err(err),
        };

        let transcript = session.transcript().clone();
        session.close().await;

        let value = result?;
        print_result(&args.method, &value, format);
        if verbose {
            print_transcript(&transcript, format)?;
        }
        Ok(SUCCESS)
    })
}
