//! Interactive shell over the flatfs engine.
//!
//! Thin dispatch glue: reads a line, splits it into a command token and
//! positional arguments, validates the argument count, and calls the
//! facade. All real checking lives in the engine; numeric arguments are
//! parsed here so the engine only ever sees valid integers.

use std::convert::TryFrom;
use std::io::{self, BufRead, Write};

use anyhow::Result;

use flatfs::{FileDisk, FlatFs, Geometry};

/// Fill byte used by `write <fd> <offset> <size>`. The engine carries real
/// payload; this keeps the command's size-only surface.
const FILL: u8 = b'1';

fn main() -> Result<()> {
    let stdin = io::stdin();
    let mut fs: FlatFs<FileDisk> = FlatFs::new();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let mut tokens = line.split_whitespace();
        let command = match tokens.next() {
            Some(token) => token,
            None => continue,
        };
        let args: Vec<&str> = tokens.collect();

        match dispatch(&mut fs, command, &args) {
            Ok(Some(output)) => println!("{}", output),
            Ok(None) => {}
            Err(report) => println!("{}", report),
        }
    }
}

/// Runs one command. `Ok` carries the text to print, `Err` a failure
/// report; both end up on stdout, mirroring the engine's all-informational
/// output contract.
fn dispatch(
    fs: &mut FlatFs<FileDisk>,
    command: &str,
    args: &[&str],
) -> std::result::Result<Option<String>, String> {
    match command {
        "mkfs" => {
            check_args(args, 2)?;
            let blocks = parse_int(args[1])?;
            let mut vol = FileDisk::create(args[0]).map_err(|e| e.to_string())?;
            FlatFs::format(&mut vol, &Geometry::with_blocks(blocks)).map_err(report)?;
            Ok(Some(format!("Formatted {} with {} blocks", args[0], blocks)))
        }
        "mount" => {
            check_args(args, 1)?;
            fs.mount_path(args[0]).map_err(report)?;
            Ok(Some(format!("Mounted {}", args[0])))
        }
        "unmount" => {
            if !fs.is_mounted() {
                return Err("Disk not mounted".to_string());
            }
            fs.unmount();
            Ok(Some("Disk unmounted".to_string()))
        }
        "ls" => {
            let mut listing = String::new();
            for entry in fs.list().map_err(report)? {
                listing.push_str(&format!("{} : {}\n", entry.id, entry.name));
            }
            Ok(Some(listing))
        }
        "filestat" => {
            check_args(args, 1)?;
            let id = u8::try_from(parse_int(args[0])?).map_err(|_| report(flatfs::FsError::NotFound))?;
            let stat = fs.stat(id).map_err(report)?;
            Ok(Some(format!(
                "ID : {}\nType : {:?}\nLinks count : {}\nSize : {}B",
                stat.id, stat.kind, stat.links, stat.size
            )))
        }
        "create" => {
            check_args(args, 1)?;
            fs.create(args[0]).map_err(report)?;
            Ok(Some("File created".to_string()))
        }
        "open" => {
            check_args(args, 1)?;
            let fd = fs.open(args[0]).map_err(report)?;
            Ok(Some(format!("Opened. File descriptor generated : {}", fd)))
        }
        "close" => {
            check_args(args, 1)?;
            fs.close(parse_int(args[0])?).map_err(report)?;
            Ok(Some("File closed".to_string()))
        }
        "read" => {
            check_args(args, 3)?;
            let payload = fs
                .read(parse_int(args[0])?, parse_int(args[1])?, parse_int(args[2])?)
                .map_err(report)?;
            Ok(Some(String::from_utf8_lossy(&payload).into_owned()))
        }
        "write" => {
            check_args(args, 3)?;
            let size = parse_int(args[2])? as usize;
            fs.write(parse_int(args[0])?, parse_int(args[1])?, &vec![FILL; size])
                .map_err(report)?;
            Ok(None)
        }
        "link" => {
            check_args(args, 2)?;
            fs.link(args[0], args[1]).map_err(report)?;
            Ok(None)
        }
        "unlink" => {
            check_args(args, 1)?;
            fs.unlink(args[0]).map_err(report)?;
            Ok(None)
        }
        "truncate" => {
            check_args(args, 2)?;
            fs.truncate(args[0], parse_int(args[1])?).map_err(report)?;
            Ok(None)
        }
        "help" => Ok(Some(usage())),
        "q" => std::process::exit(0),
        _ => Err(format!("{}: Command not found", command)),
    }
}

fn check_args(args: &[&str], want: usize) -> std::result::Result<(), String> {
    if args.len() < want {
        return Err("Enter more arguments".to_string());
    }
    Ok(())
}

fn parse_int(token: &str) -> std::result::Result<u32, String> {
    token
        .parse::<u32>()
        .map_err(|_| format!("Not a number : {}", token))
}

fn report(err: flatfs::FsError) -> String {
    format!("Error : {}", err)
}

fn usage() -> String {
    [
        "mkfs <path> <blocks>      format a new image",
        "mount <path>              mount an image",
        "unmount                   unmount the current image",
        "ls                        list files",
        "filestat <id>             show inode metadata",
        "create <name>             create an empty file",
        "open <name>               open a file, printing its descriptor",
        "close <fd>                close a descriptor",
        "read <fd> <off> <size>    read a byte range",
        "write <fd> <off> <size>   fill a byte range",
        "link <name> <new>         add a hard link",
        "unlink <name>             remove a name",
        "truncate <name> <size>    grow or shrink a file",
        "q                         quit",
    ]
    .join("\n")
}
