/// Scale ratios an algorithm can apply in a single pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScaleSupport {
    /// Only these ratios, kept sorted ascending.
    Fixed(Vec<u32>),
    /// Any positive integer ratio.
    Arbitrary,
}

impl ScaleSupport {
    pub fn fixed(ratios: &[u32]) -> Self {
        let mut ratios: Vec<u32> = ratios.iter().copied().filter(|&r| r > 0).collect();
        ratios.sort_unstable();
        ratios.dedup();
        ScaleSupport::Fixed(ratios)
    }

    pub fn smallest(&self) -> u32 {
        match self {
            ScaleSupport::Fixed(ratios) => ratios.first().copied().unwrap_or(1),
            ScaleSupport::Arbitrary => 1,
        }
    }

    pub fn supports(&self, ratio: u32) -> bool {
        match self {
            ScaleSupport::Fixed(ratios) => ratios.contains(&ratio),
            ScaleSupport::Arbitrary => ratio > 0,
        }
    }
}

/// Decomposes the scale from `input` to `output` into single-pass ratios.
///
/// The product of the returned ratios is at least the required scale, so a
/// final downscale to the exact output size is always a reduction.
pub fn plan(input: (u32, u32), output: (u32, u32), support: &ScaleSupport) -> Vec<u32> {
    let (input_width, input_height) = input;
    let (output_width, output_height) = output;
    let scale = f64::max(
        output_width as f64 / input_width.max(1) as f64,
        output_height as f64 / input_height.max(1) as f64,
    );
    let required = scale.ceil();

    if required <= 1.0 {
        return vec![support.smallest()];
    }

    let ratios = match support {
        ScaleSupport::Arbitrary => return vec![required as u32],
        ScaleSupport::Fixed(ratios) => ratios,
    };
    let largest = match ratios.last() {
        Some(&largest) if largest > 1 => largest,
        _ => return vec![support.smallest()],
    };

    let mut remaining = required;
    let mut passes = Vec::new();
    while remaining > 1.0 {
        if let Some(&ratio) = ratios.iter().find(|&&r| r as f64 >= remaining) {
            passes.push(ratio);
            remaining /= ratio as f64;
        } else if let Some((i, j)) = find_pair(ratios, remaining) {
            passes.extend([i, j]);
            remaining /= (i * j) as f64;
        } else {
            passes.push(largest);
            remaining /= largest as f64;
        }
    }
    passes
}

fn find_pair(ratios: &[u32], remaining: f64) -> Option<(u32, u32)> {
    ratios.iter()
        .flat_map(|&i| ratios.iter().map(move |&j| (i, j)))
        .find(|&(i, j)| (i * j) as f64 >= remaining)
}
