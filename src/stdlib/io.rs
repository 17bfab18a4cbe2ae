//! Console output and script file execution.

use super::cmd;
use crate::state::State;
use crate::value::Value;

pub(super) fn install(cs: &mut State) {
    cmd(cs, "echo", "C", |_, args, res| {
        println!("{}", args[0].get_strr());
        let _ = res;
        Ok(())
    });

    cmd(cs, "exec", "sb", |cs, args, res| {
        let file = args[0].get_str();
        match cs.run_file(&*file) {
            Ok(_) => *res = Value::Int(1),
            Err(_) => {
                if args[1].get_int() != 0 {
                    eprintln!("could not run file \"{}\"", file);
                }
                *res = Value::Int(0);
            }
        }
        Ok(())
    });
}
