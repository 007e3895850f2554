//! The standalone PennFAT REPL: format and inspect images without booting
//! the OS.

use std::io::{BufRead, Write};
use std::path::Path;

use clap::Parser;
use pennfat::{CatSink, FatFs, FsError, FsResult, OpenMode};

#[derive(Debug, Parser)]
#[command(name = "pennfat", about = "Standalone PennFAT maintenance REPL")]
struct Arguments {}

struct Repl {
    fs: Option<FatFs>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();
    let _ = Arguments::parse();

    let mut repl = Repl { fs: None };
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("pennfat> ");
        let _ = std::io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens[0] == "exit" || tokens[0] == "quit" {
            break;
        }
        if let Err(err) = repl.dispatch(&tokens) {
            eprintln!("pennfat: {}: {err}", tokens[0]);
        }
    }
}

impl Repl {
    fn dispatch(&mut self, tokens: &[&str]) -> FsResult<()> {
        match tokens {
            ["mkfs", name, blocks, code] => {
                if self.fs.is_some() {
                    return Err(FsError::Busy);
                }
                let blocks: u8 = blocks.parse().map_err(|_| FsError::InvalidArgument)?;
                let code: u8 = code.parse().map_err(|_| FsError::InvalidArgument)?;
                FatFs::format(Path::new(name), blocks, code)?;
                println!("PennFAT filesystem '{name}' created successfully.");
                Ok(())
            }
            ["mount", name] => {
                if self.fs.is_some() {
                    return Err(FsError::Busy);
                }
                self.fs = Some(FatFs::mount(Path::new(name))?);
                println!("PennFAT filesystem '{name}' mounted successfully.");
                Ok(())
            }
            ["unmount"] => {
                let fs = self.fs.take().ok_or(FsError::NotMounted)?;
                fs.unmount()?;
                println!("PennFAT filesystem unmounted successfully.");
                Ok(())
            }
            ["ls"] => {
                for entry in self.mounted()?.scan_dir(None)? {
                    println!("{}", entry.format_line());
                }
                Ok(())
            }
            ["touch", names @ ..] if !names.is_empty() => {
                let fs = self.mounted()?;
                for name in names {
                    let fd = fs.open(name, OpenMode::APPEND)?;
                    fs.close(fd)?;
                }
                Ok(())
            }
            ["chmod", perm, name] => {
                let op = parse_chmod(perm).ok_or(FsError::InvalidArgument)?;
                self.mounted()?.chmod(name, op)
            }
            ["rm", names @ ..] if !names.is_empty() => {
                let fs = self.mounted()?;
                for name in names {
                    fs.unlink(name)?;
                }
                Ok(())
            }
            ["mv", src, dest] => self.mounted()?.rename(src, dest),
            ["cp", "-h", src, dest] => self.mounted()?.copy_host_to_fat(Path::new(src), dest),
            ["cp", src, "-h", dest] => self.mounted()?.copy_fat_to_host(src, Path::new(dest)),
            ["cp", src, dest] => self.mounted()?.copy_fat_to_fat(src, dest),
            ["cat", rest @ ..] if !rest.is_empty() => {
                let (inputs, sink) = parse_cat(rest)?;
                self.mounted()?.cat(&inputs, sink)
            }
            _ => Err(FsError::InvalidArgument),
        }
    }

    fn mounted(&mut self) -> FsResult<&mut FatFs> {
        self.fs.as_mut().ok_or(FsError::NotMounted)
    }
}

/// `cat FILE... [-w OUT | -a OUT]`; no files means stdin.
fn parse_cat<'a>(tokens: &[&'a str]) -> FsResult<(Vec<&'a str>, CatSink<'a>)> {
    let mut inputs = Vec::new();
    let mut sink = CatSink::Stdout;
    let mut iter = tokens.iter().peekable();
    while let Some(&token) = iter.next() {
        match token {
            "-w" | "-a" => {
                let out = *iter.next().ok_or(FsError::NotFound)?;
                sink = if token == "-w" {
                    CatSink::Truncate(out)
                } else {
                    CatSink::Append(out)
                };
                if iter.peek().is_some() {
                    return Err(FsError::InvalidArgument);
                }
            }
            _ => inputs.push(token),
        }
    }
    Ok((inputs, sink))
}

/// `+rwx`, `-rwx`, `=rwx`, or a bare numeric mode.
fn parse_chmod(spec: &str) -> Option<u8> {
    let (op, rest) = match spec.as_bytes().first()? {
        b'+' => (pennfat::CHMOD_ADD, &spec[1..]),
        b'-' => (pennfat::CHMOD_REMOVE, &spec[1..]),
        b'=' => (pennfat::CHMOD_ASSIGN, &spec[1..]),
        _ => return spec.parse::<u8>().ok().map(|mode| mode & pennfat::CHMOD_MASK),
    };
    let mut mask = 0u8;
    for ch in rest.chars() {
        mask |= match ch {
            'r' => 0x04,
            'w' => 0x02,
            'x' => 0x01,
            _ => return None,
        };
    }
    Some(op | mask)
}
