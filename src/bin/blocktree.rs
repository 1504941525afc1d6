//! # blocktree Shell
//!
//! Interactive shell over a file-backed index.
//!
//! ## Usage
//!
//! ```bash
//! # Create a new index file (8-byte keys, 8-byte values by default)
//! blocktree --create ./index.db
//! blocktree --create ./index.db --key-size 4 --value-size 4 --blocks 256
//!
//! # Open an existing index
//! blocktree ./index.db
//! ```
//!
//! Keys and values shorter than the fixed width are right-padded with
//! spaces; longer ones are rejected.

use std::env;
use std::path::PathBuf;

use eyre::{bail, ensure, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use blocktree::config::{DEFAULT_BLOCK_SIZE, NODE_HEADER_SIZE};
use blocktree::{BTreeIndex, BlockCache, DisplayStyle, MmapCache};

const PROMPT: &str = "blocktree> ";

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let mut create_mode = false;
    let mut path: Option<PathBuf> = None;
    let mut key_size: u32 = 8;
    let mut value_size: u32 = 8;
    let mut block_size: usize = DEFAULT_BLOCK_SIZE;
    let mut blocks: u32 = 1024;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("blocktree {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--create" | "-c" => create_mode = true,
            "--key-size" => key_size = take_value(&args, &mut i)?.parse()?,
            "--value-size" => value_size = take_value(&args, &mut i)?.parse()?,
            "--block-size" => block_size = take_value(&args, &mut i)?.parse()?,
            "--blocks" => blocks = take_value(&args, &mut i)?.parse()?,
            arg if arg.starts_with('-') => bail!("unknown option: {}", arg),
            arg => {
                ensure!(path.is_none(), "more than one index path given");
                path = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let Some(path) = path else {
        print_usage();
        return Ok(());
    };

    let index = if create_mode {
        let cache = MmapCache::create(&path, block_size, blocks)?;
        let index = BTreeIndex::create(cache, key_size, value_size)?;
        println!(
            "created {} ({} blocks of {} bytes, {}-byte keys, {}-byte values)",
            path.display(),
            blocks,
            block_size,
            key_size,
            value_size
        );
        index
    } else {
        let block_size = detect_block_size(&path)?;
        let cache = MmapCache::open(&path, block_size)?;
        let index = BTreeIndex::open(cache)?;
        println!(
            "opened {} ({} keys, {}-byte keys, {}-byte values)",
            path.display(),
            index.key_count(),
            index.key_size(),
            index.value_size()
        );
        index
    };

    Shell::new(index)?.run()
}

/// The superblock records the block size at a fixed header offset; reading
/// it up front lets `open` work without a --block-size flag.
fn detect_block_size(path: &PathBuf) -> Result<usize> {
    use std::io::Read;

    let mut header = [0u8; NODE_HEADER_SIZE];
    let mut file = std::fs::File::open(path)?;
    file.read_exact(&mut header)?;
    let block_size = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;
    ensure!(
        block_size.is_power_of_two() && block_size > NODE_HEADER_SIZE,
        "{} does not start with a valid superblock",
        path.display()
    );
    Ok(block_size)
}

fn take_value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(|s| s.as_str())
        .ok_or_else(|| eyre::eyre!("{} needs a value", args[*i - 1]))
}

fn print_usage() {
    println!("blocktree - block-resident B-Tree index shell");
    println!();
    println!("Usage:");
    println!("  blocktree <path>                 Open an existing index");
    println!("  blocktree --create <path> [opts] Create a new index");
    println!();
    println!("Create options:");
    println!("  --key-size <n>     Key width in bytes (default 8)");
    println!("  --value-size <n>   Value width in bytes (default 8)");
    println!("  --block-size <n>   Block size in bytes (default 4096)");
    println!("  --blocks <n>       Number of blocks (default 1024)");
}

struct Shell {
    index: BTreeIndex<MmapCache>,
    editor: DefaultEditor,
}

impl Shell {
    fn new(index: BTreeIndex<MmapCache>) -> Result<Self> {
        let editor = DefaultEditor::new()?;
        Ok(Self { index, editor })
    }

    fn run(&mut self) -> Result<()> {
        println!("type 'help' for commands, 'quit' to leave");
        loop {
            match self.editor.readline(PROMPT) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    self.editor.add_history_entry(trimmed).ok();
                    match self.handle_line(trimmed) {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(err) => eprintln!("Error: {:#}", err),
                    }
                }
                Err(ReadlineError::Interrupted) => println!("^C"),
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("Error reading input: {}", err);
                    break;
                }
            }
        }
        self.index.detach()?;
        println!("detached");
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> Result<bool> {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match command {
            "insert" => {
                ensure!(args.len() == 2, "usage: insert <key> <value>");
                let key = self.pad(args[0], self.index.key_size(), "key")?;
                let value = self.pad(args[1], self.index.value_size(), "value")?;
                self.index.insert(&key, &value)?;
                println!("ok");
            }
            "lookup" => {
                ensure!(args.len() == 1, "usage: lookup <key>");
                let key = self.pad(args[0], self.index.key_size(), "key")?;
                match self.index.lookup(&key)? {
                    Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                    None => println!("not found"),
                }
            }
            "update" => {
                ensure!(args.len() == 2, "usage: update <key> <value>");
                let key = self.pad(args[0], self.index.key_size(), "key")?;
                let value = self.pad(args[1], self.index.value_size(), "value")?;
                self.index.update(&key, &value)?;
                println!("ok");
            }
            "delete" => {
                ensure!(args.len() == 1, "usage: delete <key>");
                let key = self.pad(args[0], self.index.key_size(), "key")?;
                self.index.delete(&key)?;
            }
            "list" => {
                let mut out = std::io::stdout().lock();
                self.index.display(&mut out, DisplayStyle::SortedKeyValue)?;
            }
            "tree" => {
                let mut out = std::io::stdout().lock();
                self.index.display(&mut out, DisplayStyle::DepthFirst)?;
            }
            "dot" => {
                let mut out = std::io::stdout().lock();
                self.index.display(&mut out, DisplayStyle::Dot)?;
            }
            "check" => {
                self.index.sanity_check()?;
                println!("sane");
            }
            "stats" => {
                println!("keys:        {}", self.index.key_count());
                println!("root block:  {}", self.index.root_block());
                println!("key size:    {}", self.index.key_size());
                println!("value size:  {}", self.index.value_size());
                println!("block size:  {}", self.index.block_size());
                println!("blocks:      {}", self.index.cache().block_count());
                println!("free blocks: {}", self.index.free_block_count()?);
            }
            "help" => {
                println!("insert <key> <value>   add a new pair");
                println!("lookup <key>           read a value");
                println!("update <key> <value>   overwrite a value");
                println!("delete <key>           (not supported)");
                println!("list                   sorted (key,value) pairs");
                println!("tree                   depth-first block dump");
                println!("dot                    graphviz digraph");
                println!("check                  verify structural invariants");
                println!("stats                  index geometry and counters");
                println!("quit                   detach and exit");
            }
            "quit" | "exit" | "q" => return Ok(false),
            other => bail!("unknown command '{}', try 'help'", other),
        }
        Ok(true)
    }

    fn pad(&self, text: &str, width: usize, what: &str) -> Result<Vec<u8>> {
        ensure!(
            text.len() <= width,
            "{} '{}' is {} bytes, this index stores {}-byte {}s",
            what,
            text,
            text.len(),
            width,
            what
        );
        let mut bytes = text.as_bytes().to_vec();
        bytes.resize(width, b' ');
        Ok(bytes)
    }
}
