use std::io::{stdin, stdout, Write};

use anyhow::Result;
use cache_sim::{sim::Simulator, trace::Access};

#[cfg(feature = "stat")]
use terminal_size::terminal_size;

peg::parser!(grammar command() for str {
    rule usize() -> usize
        = n:$(quiet!{['0'..='9']+}) {? n.parse().map_err(|_| "usize") }
        / expected!("usize")
    rule hex() -> u64
        = ("0" ['x' | 'X'])? n:$(quiet!{['0'..='9'|'a'..='f'|'A'..='F']+})
        {? u64::from_str_radix(n, 16).map_err(|_| "address of at most 16 hex digits") }
        / expected!("hexadecimal address")
    rule addrs() -> Vec<u64>
        = a:(hex() ++ __) { a }
    rule read() = "read" / "r"
    rule write() = "write" / "w"
    rule show_kind() -> ShowKind
        = ("table" / "lines") { ShowKind::Table }
        / ("stat" "s"?) { ShowKind::Stat }
        / "line" __ i:usize() { ShowKind::Line(i) }
        / ("geometry" / "geom") { ShowKind::Geometry }
    pub(crate) rule parse_command() -> Command
        = _ read() __ a:addrs() _ { Command::Read(a) }
        / _ write() __ a:addrs() _ { Command::Write(a) }
        / _ "decode" __ a:hex() _ { Command::Decode(a) }
        / _ "show" __ s:show_kind() _ { Command::Show(s) }
        / _ ("help" / "?") _ { Command::Help }
        / _ ("exit" / "quit") _ { Command::Exit }
        / _ { Command::Nop }
        / expected!("command")

    rule ws() = quiet!{[' ' | '\t' | '\r' | '\n']}
        / expected!("whitespace")
    rule _() = ws()*
    rule __() = ws()+
});

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Read(Vec<u64>),
    Write(Vec<u64>),
    Decode(u64),
    Show(ShowKind),
    Help,
    Exit,
    Nop,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ShowKind {
    Table,
    Stat,
    Line(usize),
    Geometry,
}

const HELP: &str = "\
commands:
  read|r <hex>...     read addresses
  write|w <hex>...    mark addresses dirty if present
  decode <hex>        show tag/index/offset without accessing
  show table          dump the line table
  show stat           hit/miss/eviction counters
  show line <n>       one line of the table
  show geometry       address layout
  exit|quit";

#[cfg(feature = "stat")]
fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}

fn show(sim: &Simulator, kind: ShowKind) {
    match kind {
        ShowKind::Table => println!("{}", sim.cache().table()),
        #[cfg(feature = "stat")]
        ShowKind::Stat => {
            let width = get_terminal_width().unwrap_or(60) as usize;
            println!("{}", sim.collect_stat().view(width));
        }
        #[cfg(not(feature = "stat"))]
        ShowKind::Stat => {
            let s = sim.cache().stat();
            println!(
                "hit: {}, miss: {}, eviction: {}",
                s.hits(),
                s.misses(),
                s.evictions()
            );
        }
        ShowKind::Line(i) => match sim.cache().entries().nth(i) {
            Some(e) => match e.tag {
                Some(tag) => println!("line {i}: valid, tag {tag:#x}, dirty: {}", e.dirty),
                None => println!("line {i}: invalid"),
            },
            None => println!(
                "no line {i}; the cache has {} lines",
                sim.cache().geometry().num_lines()
            ),
        },
        ShowKind::Geometry => println!("{}", sim.cache().geometry()),
    }
}

pub fn execute_interactive(sim: &mut Simulator) -> Result<()> {
    println!("entering interactive. type \"help\" for commands.");
    loop {
        print!("> ");
        stdout().flush()?;
        let mut str = String::new();
        if stdin().read_line(&mut str)? == 0 {
            break Ok(());
        }
        let parsed = match command::parse_command(&str) {
            Ok(p) => p,
            Err(e) => {
                println!("parse error: expected {}", e.expected);
                continue;
            }
        };
        match parsed {
            Command::Read(addrs) => {
                for a in addrs {
                    println!("{}", sim.step(Access::read(a)));
                }
            }
            Command::Write(addrs) => {
                for a in addrs {
                    print!("{}", sim.step(Access::write(a)));
                }
            }
            Command::Decode(a) => {
                let d = sim.cache().geometry().decode(a);
                if d.truncated {
                    println!("(address truncated to {:#x})", d.compose());
                }
                print!("{}", d.breakdown());
            }
            Command::Show(kind) => show(sim, kind),
            Command::Help => println!("{HELP}"),
            Command::Exit => break Ok(()),
            Command::Nop => {}
        }
    }
}
