use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_banner() {
    let lines: &[&str] = &[
        "       _       _ _ ",
        "__   _(_) __ _(_) |",
        "\\ \\ / / |/ _` | | |",
        " \\ V /| | (_| | | |",
        "  \\_/ |_|\\__, |_|_|",
        "         |___/     ",
    ];
    println!();
    for line in lines {
        println!("{}", style(line).cyan());
    }
    println!("{}\n", style("Answers on a schedule, delivered.").cyan());
}

/// A titled block of commands for the help screen.
pub struct GuideSection {
    title: &'static str,
    entries: Vec<(&'static str, &'static str)>,
}

impl GuideSection {
    pub fn new(title: &'static str) -> Self {
        Self {
            title,
            entries: Vec::new(),
        }
    }

    pub fn command(mut self, name: &'static str, desc: &'static str) -> Self {
        self.entries.push((name, desc));
        self
    }

    pub fn print(self) {
        println!("\n {}", style(self.title).bold().underlined());
        for (name, desc) in self.entries {
            println!("   {:<14} {}", style(name).green(), desc);
        }
    }
}
