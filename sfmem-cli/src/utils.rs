// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub fn add_commas(n: u64) -> String {
    let s = n.to_string();
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}

// Seconds, to two decimal places
pub fn secs(elapsed: std::time::Duration) -> String {
    format!("{:.2}", elapsed.as_secs_f64())
}
