mod cli;

use std::fs;
use std::io::{self, BufRead, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;

use clap::Parser;
use cli::Cli;
use level_fs::{FileSystem, FormatOptions, InodeKind, OpenMode};

const HELP: &str = "\
newfs                     create an empty file system on the image
mount / unmount           mount or unmount the image
ls [path]                 list a directory
cat <path>                print a file
mkdir <path>              create a directory
touch <path>              create an empty file or update its mdate
echo <text> > <path>      write text to a file, `>>` appends
stat <path>               show an inode
blockmap / inodemap       show the allocation maps
alloc_block               allocate a block
free_block <block>        free a block
alloc_inode [f|d|s]       allocate an inode
free_inode <inode>        free an inode
find_block <path> <n>     physical block of logical block n
print_tree <path>         show the indirection tree
help                      this text
exit                      unmount and quit";

struct Shell {
    image: PathBuf,
    options: FormatOptions,
    fs: Option<FileSystem>,
}

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut shell = Shell {
        image: cli.image.clone(),
        options: cli.format_options(),
        fs: None,
    };

    match &cli.script {
        Some(script) => {
            for line in fs::read_to_string(script)?.lines() {
                println!("% {line}");
                if shell.execute(line).is_break() {
                    break;
                }
            }
        }
        None => {
            let stdin = io::stdin();
            let mut lines = stdin.lock().lines();
            loop {
                print!("% ");
                io::stdout().flush()?;
                let Some(line) = lines.next() else { break };
                if shell.execute(&line?).is_break() {
                    break;
                }
            }
        }
    }

    shell.unmount();
    Ok(())
}

impl Shell {
    fn execute(&mut self, line: &str) -> ControlFlow<()> {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let args: Vec<&str> = rest.split_whitespace().collect();

        let result = match command {
            "" => Ok(()),
            "help" => {
                println!("{HELP}");
                Ok(())
            }
            "exit" | "quit" => return ControlFlow::Break(()),
            "newfs" => self.newfs(),
            "mount" => self.mount(),
            "unmount" => {
                self.unmount();
                Ok(())
            }
            _ => match self.fs.as_mut() {
                Some(fs) => run(fs, command, rest, &args),
                None => Err(String::from("no file system is mounted")),
            },
        };

        if let Err(err) = result {
            println!("{command}: {err}");
        }
        ControlFlow::Continue(())
    }

    fn newfs(&mut self) -> Result<(), String> {
        if self.fs.is_some() {
            return Err(String::from("unmount first"));
        }
        level_fs_fuse::create(&self.image, &self.options).map_err(|err| err.to_string())?;
        println!("created {}", self.image.display());
        Ok(())
    }

    fn mount(&mut self) -> Result<(), String> {
        if self.fs.is_some() {
            return Err(String::from("already mounted"));
        }
        self.fs = Some(level_fs_fuse::mount(&self.image).map_err(|err| err.to_string())?);
        Ok(())
    }

    fn unmount(&mut self) {
        if let Some(fs) = self.fs.take() {
            if let Err(err) = fs.unmount() {
                println!("unmount: {err}");
            }
        }
    }
}

/// 需要已挂载文件系统的命令
fn run(fs: &mut FileSystem, command: &str, rest: &str, args: &[&str]) -> Result<(), String> {
    match (command, args) {
        ("ls", []) => ls(fs, "/"),
        ("ls", [path]) => ls(fs, path),
        ("cat", [path]) => cat(fs, path),
        ("mkdir", [path]) => fs.mkdir(path).map(drop).map_err(|err| err.to_string()),
        ("touch", [path]) => fs.touch(path).map(drop).map_err(|err| err.to_string()),
        ("echo", _) => echo(fs, rest),
        ("stat", [path]) => stat(fs, path),
        ("blockmap", []) => {
            println!("{}", fs.block_map_string());
            println!("{} free", fs.free_blocks());
            Ok(())
        }
        ("inodemap", []) => {
            println!("{}", fs.inode_map_string());
            println!("{} free", fs.free_inodes());
            Ok(())
        }
        ("alloc_block", []) => {
            let block_id = fs.allocate_block().map_err(|err| err.to_string())?;
            println!("{block_id}");
            Ok(())
        }
        ("free_block", [block_id]) => {
            let block_id = block_id.parse().map_err(|_| format!("bad block {block_id}"))?;
            fs.free_block(block_id).map_err(|err| err.to_string())
        }
        ("alloc_inode", kind) => {
            let kind = match kind {
                [] | ["f"] => InodeKind::File,
                ["d"] => InodeKind::Directory,
                ["s"] => InodeKind::Symlink,
                _ => return Err(String::from("kind is one of f, d, s")),
            };
            let inode = fs.allocate_inode(kind).map_err(|err| err.to_string())?;
            println!("{inode}");
            Ok(())
        }
        ("free_inode", [inode]) => {
            let inode = inode.parse().map_err(|_| format!("bad inode {inode}"))?;
            fs.free_inode(inode).map_err(|err| err.to_string())
        }
        ("find_block", [path, block_index]) => {
            let block_index = block_index
                .parse()
                .map_err(|_| format!("bad block index {block_index}"))?;
            let inode = fs.namei(path).map_err(|err| err.to_string())?;
            match fs.resolve(inode, block_index, false) {
                Ok(Some(block_id)) => println!("{block_id}"),
                Ok(None) => println!("not allocated"),
                Err(err) => return Err(err.to_string()),
            }
            Ok(())
        }
        ("print_tree", [path]) => {
            let inode = fs.namei(path).map_err(|err| err.to_string())?;
            print!("{}", fs.block_tree(inode).map_err(|err| err.to_string())?);
            Ok(())
        }
        ("ls" | "cat" | "mkdir" | "touch" | "stat" | "blockmap" | "inodemap" | "alloc_block"
        | "free_block" | "alloc_inode" | "free_inode" | "find_block" | "print_tree", _) => {
            Err(String::from("wrong arguments, see `help`"))
        }
        _ => Err(String::from("unknown command, see `help`")),
    }
}

fn ls(fs: &mut FileSystem, path: &str) -> Result<(), String> {
    for entry in fs.list(path).map_err(|err| err.to_string())? {
        println!("{} {:>5} {}", entry.kind.as_char(), entry.inode, entry.name);
    }
    Ok(())
}

fn cat(fs: &mut FileSystem, path: &str) -> Result<(), String> {
    let mut file = fs.open(path, OpenMode::Read).map_err(|err| err.to_string())?;
    let mut contents = Vec::new();
    let mut buf = vec![0; fs.block_size()];
    loop {
        let read = file.read(fs, &mut buf).map_err(|err| err.to_string())?;
        if read == 0 {
            break;
        }
        contents.extend_from_slice(&buf[..read]);
    }
    println!("{}", String::from_utf8_lossy(&contents));
    Ok(())
}

/// `echo <text> > <path>` 或 `echo <text> >> <path>`
fn echo(fs: &mut FileSystem, rest: &str) -> Result<(), String> {
    let (text, path, mode) = if let Some((text, path)) = rest.rsplit_once(">>") {
        (text, path, OpenMode::Append)
    } else if let Some((text, path)) = rest.rsplit_once('>') {
        (text, path, OpenMode::Write)
    } else {
        println!("{rest}");
        return Ok(());
    };

    let mut file = fs.open(path.trim(), mode).map_err(|err| err.to_string())?;
    let text = format!("{}\n", text.trim());
    let written = file.write(fs, text.as_bytes()).map_err(|err| err.to_string())?;
    if written < text.len() {
        return Err(format!("only {written} of {} bytes written", text.len()));
    }
    Ok(())
}

fn stat(fs: &mut FileSystem, path: &str) -> Result<(), String> {
    let inode = fs.namei(path).map_err(|err| err.to_string())?;
    let stat = fs.stat(inode).map_err(|err| err.to_string())?;
    println!("inode  {}", stat.inode);
    println!("kind   {:?}", stat.kind);
    println!("perms  {:o}", stat.perms.bits());
    println!("size   {}", stat.size);
    println!("level  {}", stat.level);
    println!("blocks {}", stat.blocks);
    println!("cdate  {}", stat.cdate);
    println!("mdate  {}", stat.mdate);
    Ok(())
}
