use relic::{Client, Request, Target, UrlEncodedFormData};
use std::env;

// Usage: php_fpm <host:port | socket path> <script> [key=value...]
fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1:9000".to_string());
    let script = args.next().unwrap_or_else(|| "/var/www/index.php".to_string());

    let target = match address.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => Target::tcp(host, port.parse().unwrap()),
        _ => Target::unix(address.clone()),
    };

    let form: UrlEncodedFormData = args
        .filter_map(|arg| arg.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
        .collect();

    let mut client = Client::new().unwrap();

    let id = client
        .send_async_request(&target, Request::post(script, form))
        .unwrap();

    let response = client.wait_for_response(id, None).unwrap();

    for (name, values) in response.headers() {
        for value in values {
            println!("{name}: {value}");
        }
    }
    println!();
    println!("{}", String::from_utf8_lossy(response.body()));

    if !response.error().is_empty() {
        eprintln!("{}", String::from_utf8_lossy(response.error()));
    }
}
