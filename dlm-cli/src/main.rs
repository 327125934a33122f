#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]

use std::future::Future;
use std::process;
use std::time::Duration;

use queue_client::{ClientError, QueueClient};
use seahorse::{App, Command, Context, Flag, FlagType};
use url::Url;

const DEFAULT_QUEUE: &str = "default";
const DEFAULT_CATEGORY: &str = "default";
const PAGE_LIMIT: u32 = 50;

const EXIT_INVALID_ARGUMENT: i32 = 2;
const EXIT_NETWORK_ERROR: i32 = 3;
const EXIT_SERVER_ERROR: i32 = 4;

fn main() {
    let app = App::new(env!("CARGO_PKG_NAME"))
        .description(env!("CARGO_PKG_DESCRIPTION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .usage("dlm [command] --queue-host <url> --key <key>")
        .command(add_command())
        .command(queues_command())
        .command(queue_command())
        .command(history_command())
        .command(clear_history_command())
        .command(cancel_command());

    app.run(std::env::args().collect());
}

fn common_flags(cmd: Command) -> Command {
    cmd.flag(
        Flag::new("queue-host", FlagType::String)
            .description("Queue broker base URL, e.g. http://localhost:9010")
            .alias("q"),
    )
    .flag(Flag::new("key", FlagType::String).description("Shared secret").alias("k"))
}

fn queue_flag(cmd: Command) -> Command {
    cmd.flag(Flag::new("queue", FlagType::String).description("Queue name (default: default)"))
}

fn add_command() -> Command {
    let cmd = Command::new("add")
        .description("Queue an item for download")
        .usage("dlm add <source_url> <destination_path>")
        .flag(
            Flag::new("category", FlagType::String)
                .description("Category tag (default: default)")
                .alias("cat"),
        )
        .action(add_action);
    queue_flag(common_flags(cmd))
}

fn queues_command() -> Command {
    let cmd = Command::new("queues")
        .description("Show all queues")
        .usage("dlm queues")
        .action(queues_action);
    common_flags(cmd)
}

fn queue_command() -> Command {
    let cmd = Command::new("queue")
        .description("Show a queue's items and their status")
        .usage("dlm queue [--queue <name>]")
        .action(queue_action);
    queue_flag(common_flags(cmd))
}

fn history_command() -> Command {
    let cmd = Command::new("history")
        .description("Show a queue's finished items and their status")
        .usage("dlm history [--queue <name>]")
        .action(history_action);
    queue_flag(common_flags(cmd))
}

fn clear_history_command() -> Command {
    let cmd = Command::new("clear-history")
        .description("Clear a queue's finished items")
        .usage("dlm clear-history [--queue <name>]")
        .action(clear_history_action);
    queue_flag(common_flags(cmd))
}

fn cancel_command() -> Command {
    let cmd = Command::new("cancel")
        .description("Cancel a queued item")
        .usage("dlm cancel <item_id>")
        .action(cancel_action);
    common_flags(cmd)
}

fn add_action(c: &Context) {
    if c.args.len() != 2 {
        exit_with(
            "expected two arguments -- the url to fetch from and a path to store to",
            EXIT_INVALID_ARGUMENT,
        );
    }

    let source = match Url::parse(&c.args[0]) {
        Ok(url) => url,
        Err(error) => exit_with(&format!("source url is invalid: {error}"), EXIT_INVALID_ARGUMENT),
    };

    let destination = parse_destination(&c.args[1]);

    let client = rpc_client(c);
    let queue = string_flag_or(c, "queue", DEFAULT_QUEUE);
    let category = string_flag_or(c, "category", DEFAULT_CATEGORY);

    match block_on(client.enqueue_item(&queue, source.as_str(), destination.as_str(), &category)) {
        Ok(_) => eprintln!("item added"),
        Err(error) => exit_client_error("error adding the item to the queue", &error),
    }
}

// A bare path becomes a file:// url; anything else must already be file://.
fn parse_destination(raw: &str) -> Url {
    match Url::parse(raw) {
        Ok(url) if url.scheme() == "file" => url,
        Ok(_) => exit_with("only file:// destination urls are supported", EXIT_INVALID_ARGUMENT),
        Err(url::ParseError::RelativeUrlWithoutBase) => match Url::parse(&format!("file:{raw}")) {
            Ok(url) => url,
            Err(error) => exit_with(&format!("destination url is invalid: {error}"), EXIT_INVALID_ARGUMENT),
        },
        Err(error) => exit_with(&format!("destination url is invalid: {error}"), EXIT_INVALID_ARGUMENT),
    }
}

fn queues_action(c: &Context) {
    let client = rpc_client(c);

    match block_on(client.list_queues()) {
        Ok(queues) => {
            for queue in queues {
                println!("{}", queue.name);
            }
        }
        Err(error) => exit_client_error("error fetching queues", &error),
    }
}

fn queue_action(c: &Context) {
    let client = rpc_client(c);
    let queue = string_flag_or(c, "queue", DEFAULT_QUEUE);

    let mut rows = vec![columns(&["Source", "Destination", "Downloaded", "Total", "%"])];

    let mut next = String::new();
    loop {
        let page = match block_on(client.get_queue_items(&queue, &next, PAGE_LIMIT)) {
            Ok(page) => page,
            Err(error) => exit_client_error("error fetching queue items", &error),
        };

        for item in &page.items {
            let percentage = if item.total_size_bytes != 0 {
                item.downloaded_bytes as f64 / item.total_size_bytes as f64 * 100.0
            } else {
                0.0
            };

            rows.push(vec![
                item.source.clone(),
                item.destination.clone(),
                item.downloaded_bytes.to_string(),
                item.total_size_bytes.to_string(),
                format!("{percentage:4.1}"),
            ]);
        }

        next = page.next;
        if next.is_empty() {
            break;
        }
    }

    print_table(&rows);
}

fn history_action(c: &Context) {
    let client = rpc_client(c);
    let queue = string_flag_or(c, "queue", DEFAULT_QUEUE);

    let mut rows = vec![columns(&["Source", "Destination", "State", "Size", "Message"])];

    let mut next = String::new();
    loop {
        let page = match block_on(client.get_finished_items(&queue, &next, PAGE_LIMIT)) {
            Ok(page) => page,
            Err(error) => exit_client_error("error fetching queue history items", &error),
        };

        for item in &page.items {
            rows.push(vec![
                item.source.clone(),
                item.destination.clone(),
                item.state.to_string(),
                item.total_size_bytes.to_string(),
                item.message.clone(),
            ]);
        }

        next = page.next;
        if next.is_empty() {
            break;
        }
    }

    print_table(&rows);
}

fn clear_history_action(c: &Context) {
    let client = rpc_client(c);
    let queue = string_flag_or(c, "queue", DEFAULT_QUEUE);

    if let Err(error) = block_on(client.clear_history(&queue)) {
        exit_client_error("error clearing history", &error);
    }
}

fn cancel_action(c: &Context) {
    if c.args.len() != 1 {
        exit_with("expected one argument -- the item id to cancel", EXIT_INVALID_ARGUMENT);
    }

    let client = rpc_client(c);

    match block_on(client.cancel_item(&c.args[0])) {
        Ok(()) => eprintln!("item cancelled"),
        Err(error) => exit_client_error("error cancelling the item", &error),
    }
}

fn rpc_client(c: &Context) -> QueueClient {
    let host = match c.string_flag("queue-host") {
        Ok(host) if !host.is_empty() => host,
        _ => exit_with("--queue-host is required", EXIT_INVALID_ARGUMENT),
    };

    let key = match c.string_flag("key") {
        Ok(key) if !key.is_empty() => key,
        _ => exit_with("--key is required", EXIT_INVALID_ARGUMENT),
    };

    match QueueClient::new(&host, &key, Duration::from_secs(10)) {
        Ok(client) => client,
        Err(error) => exit_with(&format!("error connecting to queue host: {error}"), EXIT_NETWORK_ERROR),
    }
}

fn string_flag_or(c: &Context, name: &str, default: &str) -> String {
    match c.string_flag(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_owned(),
    }
}

fn block_on<F: Future>(future: F) -> F::Output {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => exit_with(&format!("failed to build the async runtime: {error}"), EXIT_SERVER_ERROR),
    };

    runtime.block_on(future)
}

fn columns(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

fn print_table(rows: &[Vec<String>]) {
    let column_count = rows.iter().map(Vec::len).max().unwrap_or(0);

    let mut widths = vec![0usize; column_count];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    for row in rows {
        let mut line = String::new();
        for (i, cell) in row.iter().enumerate() {
            line.push_str(cell);
            if i + 1 < row.len() {
                line.push_str(&" ".repeat(widths[i] - cell.len() + 2));
            }
        }
        println!("{line}");
    }
}

fn exit_client_error(context: &str, error: &ClientError) -> ! {
    let code = if error.is_network() {
        EXIT_NETWORK_ERROR
    } else {
        EXIT_SERVER_ERROR
    };
    exit_with(&format!("{context}: {error}"), code)
}

fn exit_with(message: &str, code: i32) -> ! {
    eprintln!("{message}");
    process::exit(code)
}
