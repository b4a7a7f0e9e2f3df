use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use ota_core::config::DEFAULT_PORT;
use ota_core::header::FACTORY_COMMAND;
use ota_core::RequestHeader;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

const CHUNK_SIZE: usize = 1024;

#[derive(Parser)]
#[command(name = "ota")]
#[command(about = "Push firmware to an ESP32 OTA server", long_about = None)]
struct Cli {
    /// Device IP address
    ip: String,

    /// Firmware image to upload (defaults to release build)
    #[arg(short, long, conflicts_with = "factory")]
    firmware: Option<PathBuf>,

    /// Set the factory partition as the next boot target instead of uploading
    #[arg(long)]
    factory: bool,

    /// Port number
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for the device reply
    #[arg(short, long, default_value = "60")]
    timeout: u64,
}

fn main() {
    let cli = Cli::parse();

    let address = match resolve(&cli.ip, cli.port) {
        Ok(address) => address,
        Err(e) => {
            eprintln!("{} Invalid device address {}: {}", "❌".red(), cli.ip, e);
            std::process::exit(1);
        }
    };

    let (header, body) = if cli.factory {
        println!("{} ESP32 OTA boot command", "🚀".blue());
        (RequestHeader::factory_command(), FACTORY_COMMAND.to_vec())
    } else {
        let firmware_path = cli.firmware.unwrap_or_else(|| {
            PathBuf::from("target/xtensa-esp32-espidf/release/esp32-ota-server.bin")
        });
        if !firmware_path.exists() {
            eprintln!("{} Firmware not found: {}", "❌".red(), firmware_path.display());
            eprintln!("   Build and convert the image with espflash save-image first");
            std::process::exit(1);
        }
        let data = match fs::read(&firmware_path) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("{} Failed to read firmware: {}", "❌".red(), e);
                std::process::exit(1);
            }
        };
        if data.is_empty() {
            eprintln!("{} Firmware file is empty", "❌".red());
            std::process::exit(1);
        }
        println!("{} ESP32 OTA update", "🚀".blue());
        println!(
            "{}Firmware: {} bytes ({:.2} MB)",
            "   ".dimmed(),
            data.len(),
            data.len() as f64 / 1024.0 / 1024.0
        );
        (RequestHeader::firmware(data.len()), data)
    };
    println!("{}Device: {}", "   ".dimmed(), address);

    let pb = ProgressBar::new(body.len() as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style.progress_chars("#>-"));

    let reply = push(address, &header, &body, Duration::from_secs(cli.timeout), &pb);
    pb.finish_and_clear();

    match reply {
        Ok(reply) if reply.starts_with("200 ") => {
            println!("{} {}", "✅".green(), detail(&reply));
            println!("\n{} Device will restart shortly", "✨".green());
        }
        Ok(reply) if reply.is_empty() => {
            eprintln!("{} Device closed the connection without a reply", "❌".red());
            std::process::exit(1);
        }
        Ok(reply) => {
            eprintln!("{} {}", "❌".red(), detail(&reply));
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{} Error: {}", "❌".red(), e);
            std::process::exit(1);
        }
    }
}

fn resolve(ip: &str, port: u16) -> io::Result<SocketAddr> {
    (ip, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address"))
}

fn push(
    address: SocketAddr,
    header: &RequestHeader,
    body: &[u8],
    timeout: Duration,
    pb: &ProgressBar,
) -> io::Result<String> {
    let mut stream = TcpStream::connect_timeout(&address, Duration::from_secs(5))?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_read_timeout(Some(timeout))?;

    stream.write_all(header.encode().as_bytes())?;
    for chunk in body.chunks(CHUNK_SIZE) {
        stream.write_all(chunk)?;
        pb.inc(chunk.len() as u64);
    }
    stream.flush()?;

    // The server closes the connection after its single reply.
    let mut reply = String::new();
    stream.read_to_string(&mut reply)?;
    Ok(reply)
}

/// Reply text after the status line.
fn detail(reply: &str) -> &str {
    reply
        .split_once("\n\n")
        .map_or(reply, |(_, rest)| rest)
        .trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_strips_status_line() {
        assert_eq!(
            detail("200 OK\n\nSuccess. Next boot partition is ota_0\n"),
            "Success. Next boot partition is ota_0"
        );
        assert_eq!(
            detail("400 Bad Request\n\nFailure. Error code: 0x102\n"),
            "Failure. Error code: 0x102"
        );
    }

    #[test]
    fn detail_keeps_unstructured_text() {
        assert_eq!(detail("garbage\n"), "garbage");
    }

    #[test]
    fn factory_flag_conflicts_with_firmware() {
        assert!(Cli::try_parse_from(["ota", "10.0.0.2", "--factory", "-f", "a.bin"]).is_err());
        let cli = Cli::try_parse_from(["ota", "10.0.0.2", "--factory"]).unwrap();
        assert!(cli.factory);
        assert_eq!(cli.port, DEFAULT_PORT);
    }
}
