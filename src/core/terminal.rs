use console::{Emoji, style};

pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

pub fn print_banner() {
    let lines: &[&str] = &[
        "     _                               _      ",
        "  __| | _____   __ ___ __ _ ___  ___ __ _  __| | ___ ",
        " / _` |/ _ \\ \\ / // __/ _` / __|/ __/ _` |/ _` |/ _ \\",
        "| (_| |  __/\\ V /| (_| (_| \\__ \\ (_| (_| | (_| |  __/",
        " \\__,_|\\___| \\_/  \\___\\__,_|___/\\___\\__,_|\\__,_|\\___|",
    ];

    // Diagonal gradient #38bdf8 -> #818cf8 -> #34d399.
    let stops: [(u8, u8, u8); 3] = [(56, 189, 248), (129, 140, 248), (52, 211, 153)];
    let max_w = 53u32;
    let max_d = max_w + 4 * 10;

    println!();
    for (y, line) in lines.iter().enumerate() {
        for (x, ch) in line.chars().enumerate() {
            if ch == ' ' {
                print!(" ");
                continue;
            }
            let d = ((x as u32 + y as u32 * 10) * 1000 / max_d).min(1000);
            let (r, g, b) = if d <= 500 {
                lerp_color(stops[0], stops[1], d * 2)
            } else {
                lerp_color(stops[1], stops[2], (d - 500) * 2)
            };
            print!("\x1b[38;2;{};{};{}m{}", r, g, b, ch);
        }
        println!();
    }
    print!("\x1b[0m");

    println!("\x1b[38;2;52;211;153mOne sentence in, a whole workflow out.\x1b[0m\n");
}

fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: u32) -> (u8, u8, u8) {
    let r = (a.0 as u32 * (1000 - t) + b.0 as u32 * t) / 1000;
    let g = (a.1 as u32 * (1000 - t) + b.1 as u32 * t) / 1000;
    let b_val = (a.2 as u32 * (1000 - t) + b.2 as u32 * t) / 1000;
    (r as u8, g as u8, b_val as u8)
}

pub fn print_goodbye() {
    println!(
        "\n{} {}",
        SPARKLE,
        style("devcascade stopped. See you next time!").bold().cyan()
    );
}

/// A titled block of `command  description` rows for help output.
pub struct GuideSection {
    title: String,
    rows: Vec<(String, String)>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.rows.push((name.to_string(), description.to_string()));
        self
    }

    pub fn render(&self) -> Vec<String> {
        let width = self.rows.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
        self.rows
            .iter()
            .map(|(name, desc)| format!("  {:<width$}  {}", name, desc, width = width))
            .collect()
    }

    pub fn print(&self) {
        println!("\n {}", style(&self.title).bold().underlined());
        for line in self.render() {
            println!("{}", line);
        }
    }
}
