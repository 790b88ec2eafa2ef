use kjm_data::{CreateJobRequest, JobStatus, StringMap};
use structopt::StructOpt;

mod operations;

/// command line client for the job manager
#[derive(StructOpt, Debug)]
#[structopt(name = "kjm-client")]
struct Opt {
    /// base url of the server, e.g. http://localhost:8000
    #[structopt(name = "REMOTE_URL")]
    remote_url: String,

    #[structopt(subcommand)]
    operation: Operation,
}

#[derive(Debug, StructOpt)]
enum Operation {
    /// queue a new job
    Submit(SubmitOperation),
    List(ListOperation),
    Show(JobOperation),
    /// cancel a job that has not been launched yet
    Cancel(JobOperation),
    /// fetch the current backend state of a job
    Refresh(JobOperation),
    Workloads,
    /// execution units of all managed workloads
    Units,
    Logs(LogsOperation),
}

#[derive(Debug, StructOpt)]
struct SubmitOperation {
    #[structopt(name = "NAME")]
    name: String,
    #[structopt(name = "IMAGE")]
    image: String,
    #[structopt(name = "COMMAND")]
    command: Vec<String>,
    #[structopt(long = "arg", number_of_values = 1)]
    args: Vec<String>,
    /// KEY=VALUE, repeatable
    #[structopt(long = "label", number_of_values = 1, parse(try_from_str = parse_pair))]
    labels: Vec<(String, String)>,
    /// KEY=VALUE, repeatable
    #[structopt(long = "config", number_of_values = 1, parse(try_from_str = parse_pair))]
    configuration: Vec<(String, String)>,
}

#[derive(Debug, StructOpt)]
struct ListOperation {
    #[structopt(long)]
    status: Option<JobStatus>,
}

#[derive(Debug, StructOpt)]
struct JobOperation {
    #[structopt(name = "JOB_ID")]
    id: String,
}

#[derive(Debug, StructOpt)]
struct LogsOperation {
    #[structopt(name = "UNIT")]
    unit: String,
    #[structopt(long)]
    container: Option<String>,
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {:?}", s)),
    }
}

impl SubmitOperation {
    fn into_request(self) -> CreateJobRequest {
        CreateJobRequest {
            name: self.name,
            container_image: self.image,
            command: self.command,
            args: self.args,
            labels: self.labels.into_iter().collect::<StringMap>(),
            configuration: self.configuration.into_iter().collect::<StringMap>(),
        }
    }
}

fn main() {
    let opt = Opt::from_args();
    let url = opt.remote_url.trim_end_matches('/');
    let client = match reqwest::blocking::Client::builder().use_rustls_tls().build() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("could not build http client: {}", e);
            std::process::exit(1);
        }
    };
    let output = match opt.operation {
        Operation::Submit(submit) => operations::submit(&client, url, &submit.into_request()),
        Operation::List(list) => operations::list(&client, url, list.status),
        Operation::Show(job) => operations::show(&client, url, &job.id),
        Operation::Cancel(job) => operations::cancel(&client, url, &job.id),
        Operation::Refresh(job) => operations::refresh(&client, url, &job.id),
        Operation::Workloads => operations::workloads(&client, url),
        Operation::Units => operations::units(&client, url),
        Operation::Logs(logs) => {
            operations::logs(&client, url, &logs.unit, logs.container.as_deref())
        }
    };
    println!("{}", output);
}
