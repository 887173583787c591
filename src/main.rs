use sysy_ssa_opt::driver::Driver;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let mut driver = Driver::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--scenario" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --scenario requires an argument (1-6)");
                    std::process::exit(1);
                }
                match args[i].parse::<u32>() {
                    Ok(n) => driver.scenario = Some(n),
                    Err(_) => {
                        eprintln!("error: --scenario expects an integer, found `{}`", args[i]);
                        std::process::exit(1);
                    }
                }
            }
            "--emit-ir" => driver.emit_ir = true,
            "-O0" => driver.opt_level = 0,
            "-O1" => driver.opt_level = 1,
            "-O2" => driver.opt_level = 2,
            "-O3" => driver.opt_level = 3,
            "-v" | "--verbose" => driver.verbose = true,
            arg if arg.starts_with('-') => {
                eprintln!("warning: unknown flag: {arg}");
            }
            other => {
                eprintln!("warning: ignoring positional argument `{other}` (no front end in this build; use --scenario)");
            }
        }
        i += 1;
    }

    if let Err(e) = driver.run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
