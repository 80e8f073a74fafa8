use std::collections::BTreeMap;

use crate::signature::{CHANNELS, COEF_COUNT, Coef, IMAGE_SCALE, Signature};
use crate::types::ImageId;

/// 一次查询中的单个结果
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub id: ImageId,
    /// 越小越相似，可能为负数
    pub score: f64,
    /// 两张图片宽高比的对数差，任意一方宽高比为 0 时为 0
    pub ratio_diff: f64,
}

pub trait SignatureIndex {
    /// 添加签名，已存在的 id 会被替换
    fn add(&mut self, id: ImageId, signature: &Signature);

    /// 移除签名，返回是否存在
    fn remove(&mut self, id: ImageId) -> bool;

    /// 移除所有签名
    fn clear(&mut self);

    /// 对所有已索引的图片评分，按分数升序返回，分数相同时按 id 升序
    fn query(&self, signature: &Signature) -> Vec<Match>;

    /// 返回已索引的图片数量
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 各通道不同频段系数的权重，第 0 个为直流分量
const WEIGHTS: [[f64; 6]; CHANNELS] = [
    [5.00, 0.83, 1.01, 0.52, 0.47, 0.30],
    [19.21, 1.26, 0.44, 0.53, 0.28, 0.14],
    [34.37, 0.36, 0.45, 0.14, 0.18, 0.27],
];

#[derive(Debug)]
struct Entry {
    dc: Coef,
    ratio: f64,
    /// 该签名所在的桶，用于移除
    buckets: Vec<usize>,
}

/// 以 (通道, 符号, 系数下标) 为桶的倒排索引
///
/// 每张图片只进入它的重要系数对应的桶，查询时命中同一个桶就按权重减分
#[derive(Debug)]
pub struct BucketIndex {
    entries: BTreeMap<ImageId, Entry>,
    buckets: Vec<Vec<ImageId>>,
}

impl BucketIndex {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new(), buckets: vec![vec![]; CHANNELS * 2 * COEF_COUNT] }
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.entries.contains_key(&id)
    }
}

impl Default for BucketIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureIndex for BucketIndex {
    fn add(&mut self, id: ImageId, signature: &Signature) {
        self.remove(id);

        let mut buckets = vec![];
        for (ch, i, positive) in signature.top_coefs() {
            let key = bucket_key(ch, i, positive);
            self.buckets[key].push(id);
            buckets.push(key);
        }
        self.entries.insert(id, Entry { dc: signature.dc(), ratio: signature.ratio(), buckets });
    }

    fn remove(&mut self, id: ImageId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        for key in entry.buckets {
            self.buckets[key].retain(|x| *x != id);
        }
        true
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.buckets.iter_mut().for_each(Vec::clear);
    }

    fn query(&self, signature: &Signature) -> Vec<Match> {
        let dc = signature.dc();
        let mut scores = self
            .entries
            .iter()
            .map(|(id, entry)| {
                let score = (0..CHANNELS).map(|ch| WEIGHTS[ch][0] * (dc[ch] - entry.dc[ch]).abs());
                (*id, score.sum::<f64>())
            })
            .collect::<BTreeMap<_, _>>();

        for (ch, i, positive) in signature.top_coefs() {
            let weight = WEIGHTS[ch][weight_bin(i)];
            for id in &self.buckets[bucket_key(ch, i, positive)] {
                if let Some(score) = scores.get_mut(id) {
                    *score -= weight;
                }
            }
        }

        let mut matches = scores
            .into_iter()
            .map(|(id, score)| {
                let ratio_diff = ratio_diff(signature.ratio(), self.entries[&id].ratio);
                Match { id, score, ratio_diff }
            })
            .collect::<Vec<_>>();
        matches.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.id.cmp(&b.id)));
        matches
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn bucket_key(ch: usize, i: usize, positive: bool) -> usize {
    (ch * 2 + positive as usize) * COEF_COUNT + i
}

/// 系数所在的频段，越靠近左上角频率越低
fn weight_bin(i: usize) -> usize {
    let (row, col) = (i / IMAGE_SCALE as usize, i % IMAGE_SCALE as usize);
    row.max(col).min(5)
}

fn ratio_diff(a: f64, b: f64) -> f64 {
    if a <= 0.0 || b <= 0.0 { 0.0 } else { (a.ln() - b.ln()).abs() }
}
