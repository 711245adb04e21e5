use amplc::driver::{self, Config, Outcome};
use colored::Colorize;
use getopts::Options;
use std::env;
use std::path::PathBuf;
use std::process::exit;

fn main() {
  let args: Vec<String> = env::args().collect();
  let bin = args.first().cloned().unwrap_or_else(|| "amplc".into());

  let mut opts = Options::new();
  opts.optflag("S", "", "Print generated Jasmin assembly, do not assemble");
  opts.optopt("o", "", "Directory for the .j and .class files", "DIR");
  opts.optflag("h", "help", "Print this help menu");

  let matches = match opts.parse(args.iter().skip(1)) {
    Ok(m) => m,
    Err(f) => fail(&bin, &f.to_string()),
  };

  let usage = opts.usage(&format!("Usage: {bin} [options] <file.ampl>"));
  if matches.opt_present("h") {
    print!("{usage}");
    return;
  }

  let [source_path] = matches.free.as_slice() else {
    eprint!("{usage}");
    exit(1);
  };

  let config = Config {
    output_dir: matches.opt_str("o").map(PathBuf::from),
    emit_only: matches.opt_present("S"),
    ..Config::from_env(source_path)
  };

  let source = driver::check_environment(&config).and_then(|()| driver::read_source(&config));
  let source = match source {
    Ok(source) => source,
    Err(e) => fail(&bin, &e.to_string()),
  };

  match driver::build(&config, &source) {
    Ok(Outcome::Assembly(asm)) => print!("{asm}"),
    Ok(Outcome::Assembled { .. }) => {}
    Err(e) => fail(&bin, &e.render(&config.source_name(), &source)),
  }
}

fn fail(bin: &str, message: &str) -> ! {
  eprintln!("{}: {} {message}", bin, "error:".red().bold());
  exit(1)
}
